// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Board protocol configuration
//!
//! Slot range and settle delays of the pattern board firmware.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::board::registers::{WritePhase, DEFAULT_MAX_SLOT};

/// Pauses after each register write, giving the firmware time to finish
/// its internal write cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettleConfig {
    /// After each of the location and row-count writes.
    #[serde(default = "default_header_ms")]
    pub header_ms: u64,

    /// After each pattern cell.
    #[serde(default = "default_data_ms")]
    pub data_ms: u64,

    /// After the run trigger and the run-control writes.
    #[serde(default = "default_control_ms")]
    pub control_ms: u64,
}

fn default_header_ms() -> u64 {
    100
}

fn default_data_ms() -> u64 {
    10
}

fn default_control_ms() -> u64 {
    10
}

impl SettleConfig {
    /// No pauses at all, for simulated boards
    pub fn none() -> Self {
        Self {
            header_ms: 0,
            data_ms: 0,
            control_ms: 0,
        }
    }

    pub fn delay_for(&self, phase: WritePhase) -> Duration {
        let ms = match phase {
            WritePhase::Header => self.header_ms,
            WritePhase::Data => self.data_ms,
            WritePhase::RunTrigger | WritePhase::RunControl => self.control_ms,
        };
        Duration::from_millis(ms)
    }
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            header_ms: default_header_ms(),
            data_ms: default_data_ms(),
            control_ms: default_control_ms(),
        }
    }
}

/// Configuration of the board protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Highest storage slot. Slot 0 always means "run immediately".
    #[serde(default = "default_max_slot")]
    pub max_slot: u16,

    #[serde(default)]
    pub settle: SettleConfig,
}

fn default_max_slot() -> u16 {
    DEFAULT_MAX_SLOT
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            max_slot: default_max_slot(),
            settle: SettleConfig::default(),
        }
    }
}
