// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Pattern board controller library
//!
//! This library stores and starts timed output patterns on a pattern
//! sequencer board connected over a Modbus-RTU serial link.

pub mod board;
pub mod config;
pub mod error;
pub mod simulator;

pub use error::BoardError;
