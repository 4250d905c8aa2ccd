// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial line configuration
//!
//! This module defines the settings of the serial connection carrying the
//! Modbus-RTU link to the pattern board.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the serial Modbus-RTU link.
///
/// # Fields
///
/// * `port` - Serial device name (default: /dev/ttyUSB0)
/// * `baud_rate` - Line speed (default: 115200)
/// * `timeout_ms` - Timeout of a single request (default: 1000)
/// * `slave_id` - Modbus slave address of the board (default: 1)
///
/// # Example
///
/// ```
/// use pattern_board::config::SerialConfig;
///
/// let serial = SerialConfig {
///     port: "/dev/ttyACM0".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(serial.baud_rate, 115200);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device name, e.g. `/dev/ttyUSB0` or `COM3`.
    #[serde(default = "default_port")]
    pub port: String,

    /// Line speed in bits per second. The board firmware runs at 115200.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Timeout of a single Modbus request in milliseconds.
    ///
    /// Applied per I/O call, not per pattern transfer.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Modbus slave address of the board.
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_slave_id() -> u8 {
    1
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            slave_id: default_slave_id(),
        }
    }
}
