// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated pattern board
//!
//! This module provides a Modbus-RTU slave that behaves like the pattern
//! board firmware, so the protocol client can be exercised without hardware.
//! The simulator answers over a pseudo-terminal pair with real RTU framing,
//! so it is available on unix hosts only.
//!
//! ## Key Components
//!
//! - `BoardSimulator`: Modbus service holding the board's register map.
//! - `SimulatedConnector`: `Connector` that wires an `RtuLink` to a simulator.
//!
//! ## Usage
//!
//! ```no_run
//! use pattern_board::board::{BoardClient, BoardConnection, EventBus, Pattern};
//! use pattern_board::config::Config;
//! use pattern_board::simulator::{BoardSimulator, SimulatedConnector};
//!
//! # async fn demo() -> Result<(), pattern_board::BoardError> {
//! let config = Config::default();
//! let board = BoardSimulator::new();
//! let connector = SimulatedConnector::new(board.clone(), &config.serial);
//! let connection = BoardConnection::shared(Box::new(connector), EventBus::new());
//! connection.connect("simulated").await?;
//!
//! let client = BoardClient::new(connection, &config.board);
//! client.store_pattern(0, &Pattern::new(vec![vec![1, 2, 3]])).await?;
//! assert_eq!(board.running(), Some(0));
//! # Ok(())
//! # }
//! ```
//!
//! ## Register Map
//!
//! ### Holding Registers (Write)
//!
//! - Register 0x0000: Storage slot of the incoming pattern
//! - Register 0x0001: Number of pattern rows
//! - Registers 0x0002..: Pattern cells, row-major
//! - Register 1000: Run trigger, starts the pattern stored in slot 0
//! - Register 0x2000: Index of the pattern to run
//! - Register 0x2001: Run flag (1 = start, 0 = stop)

pub mod board_server;
pub use board_server::{BoardSimulator, SimulatedConnector};
