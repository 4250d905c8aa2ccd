// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Status notifications for the caller's UI
//!
//! The protocol layer produces `(kind, message, timestamp)` events and leaves
//! rendering to whoever subscribes. Every event is also written to the log.

use chrono::{DateTime, Local};
use log::{error, info};
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the event channel; slow subscribers lose the oldest events
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    /// Operation attempted, connection changes
    Info,
    /// Rows processed during a transfer
    Progress,
    Success,
    Failure,
}

/// A single status notification
#[derive(Debug, Clone, Serialize)]
pub struct BoardEvent {
    pub kind: EventKind,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

/// Broadcast channel shared by the connection and the protocol client.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BoardEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, kind: EventKind, message: impl Into<String>) {
        let event = BoardEvent {
            kind,
            message: message.into(),
            timestamp: Local::now(),
        };
        match kind {
            EventKind::Failure => error!("{}", event.message),
            _ => info!("{}", event.message),
        }
        // No subscriber is not an error
        let _ = self.sender.send(event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(EventKind::Info, message);
    }

    pub fn progress(&self, message: impl Into<String>) {
        self.emit(EventKind::Progress, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(EventKind::Success, message);
    }

    pub fn failure(&self, message: impl Into<String>) {
        self.emit(EventKind::Failure, message);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
