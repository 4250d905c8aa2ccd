// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Errors surfaced by the board protocol layer

use thiserror::Error;

/// Errors returned by the register codec, the connection and the protocol client.
///
/// Nothing in the protocol layer retries: every variant is returned to the
/// immediate caller of `store_pattern`, `run_pattern` or `stop_pattern`.
#[derive(Error, Debug)]
pub enum BoardError {
    /// Port unreachable, I/O timeout or link lost mid-write.
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    /// Modbus exception or malformed response from the board.
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    #[error("Invalid pattern: {reason}")]
    InvalidPattern { reason: String },

    #[error("Cell value {value} at row {row}, column {column} does not fit in a 16-bit register")]
    ValueOutOfRange { row: usize, column: usize, value: i64 },

    #[error("Slot {slot} is out of range (0..={max})")]
    SlotOutOfRange { slot: u16, max: u16 },

    #[error("Board is not connected")]
    NotConnected,

    #[error("A transfer is already in progress on this connection")]
    Busy,

    /// A multi-write sequence stopped at its first failure.
    ///
    /// `written` registers were applied before `address` failed; the board
    /// holds partial state and nothing was rolled back.
    #[error("Transfer aborted at register {address:#06x} after {written}/{total} writes: {source}")]
    Aborted {
        written: usize,
        total: usize,
        address: u16,
        #[source]
        source: Box<BoardError>,
    },
}

impl BoardError {
    pub fn transport(reason: impl Into<String>) -> Self {
        BoardError::Transport {
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        BoardError::Protocol {
            reason: reason.into(),
        }
    }

    pub fn invalid_pattern(reason: impl Into<String>) -> Self {
        BoardError::InvalidPattern {
            reason: reason.into(),
        }
    }

    /// The transport or protocol failure behind an aborted sequence,
    /// or the error itself for every other variant.
    pub fn root_cause(&self) -> &BoardError {
        match self {
            BoardError::Aborted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Number of writes applied to the board before this error occurred.
    pub fn writes_applied(&self) -> usize {
        match self {
            BoardError::Aborted { written, .. } => *written,
            _ => 0,
        }
    }
}
