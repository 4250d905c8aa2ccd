// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Pattern board protocol
//!
//! This module drives a pattern sequencer board over Modbus-RTU by writing
//! holding registers one at a time.
//!
//! ## Key Components
//!
//! - `registers`: register map and the pure encoding of store / run / stop
//!   requests into ordered register writes.
//! - `transport`: serial port opened through `tokio-serial`.
//! - `link`: Modbus-RTU register link and the connector seam.
//! - `connection`: connection state machine (`Disconnected`, `Connected`,
//!   `Busy`) owning the open link.
//! - `client`: paced protocol client issuing the writes.
//! - `events`: status notifications for the caller's UI.

pub mod client;
pub mod connection;
pub mod events;
pub mod link;
pub mod registers;
pub mod transport;

pub use client::{BoardClient, TransferReport};
pub use connection::{BoardConnection, ConnectionState, TransferGuard};
pub use events::{BoardEvent, EventBus, EventKind};
pub use link::{Connector, RegisterLink, RtuLink, SerialConnector};
pub use registers::{
    encode_run, encode_stop, encode_store, Pattern, RegisterWrite, Slot, StoreSequence, WritePhase,
};
pub use transport::SerialTransport;
