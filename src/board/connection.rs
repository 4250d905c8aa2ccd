// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Connection state machine
//!
//! A [`BoardConnection`] owns at most one open register link and tracks
//! whether it is `Disconnected`, `Connected` or `Busy` with a transfer.
//! Transfers hold a [`TransferGuard`]; dropping the guard always returns the
//! connection to `Connected`, whether the transfer succeeded, failed or was
//! cancelled, so the state can never stay stuck in `Busy`.
//!
//! Every transition is decided under the state lock before anything is
//! awaited. While `connect` or `disconnect` is opening or closing the link,
//! other transitions are refused with `Busy`.
//!
//! Calling `disconnect` during a transfer closes the link: the in-flight
//! write fails with a transport error, the transfer ends with `Aborted`, and
//! the link is released once the transfer has let go of it.
//!
//! The connection is meant to be shared through an `Arc` between the caller
//! and any task running a transfer in the background.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::board::events::EventBus;
use crate::board::link::{Connector, RegisterLink};
use crate::board::registers::RegisterWrite;
use crate::error::BoardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    /// A transfer is in flight
    Busy,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Busy => "busy",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct StateCell {
    state: ConnectionState,
    port: Option<String>,
    /// `connect` or `disconnect` is opening or closing the link
    switching: bool,
}

/// Explicitly owned connection to one board.
pub struct BoardConnection {
    connector: Box<dyn Connector>,
    state: Mutex<StateCell>,
    link: AsyncMutex<Option<Box<dyn RegisterLink>>>,
    /// Raised by `disconnect` to abort the transfer in flight
    closing: watch::Sender<bool>,
    events: EventBus,
}

impl BoardConnection {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self::with_events(connector, EventBus::new())
    }

    pub fn with_events(connector: Box<dyn Connector>, events: EventBus) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            connector,
            state: Mutex::new(StateCell {
                state: ConnectionState::Disconnected,
                port: None,
                switching: false,
            }),
            link: AsyncMutex::new(None),
            closing,
            events,
        }
    }

    /// Convenience constructor returning a shareable handle
    pub fn shared(connector: Box<dyn Connector>, events: EventBus) -> Arc<Self> {
        Arc::new(Self::with_events(connector, events))
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> ConnectionState {
        self.cell().state
    }

    /// Port of the live link, if any
    pub fn port(&self) -> Option<String> {
        self.cell().port.clone()
    }

    fn cell(&self) -> MutexGuard<'_, StateCell> {
        // The cell holds plain data; a panic elsewhere cannot leave it half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: ConnectionState, port: Option<String>) {
        let mut cell = self.cell();
        debug!("Connection state {} -> {}", cell.state, state);
        cell.state = state;
        cell.port = port;
    }

    /// Open a link to `port`.
    ///
    /// A live link is closed first, so reconnecting without an explicit
    /// disconnect never leaks the previous handle. Fails with `Busy` while a
    /// transfer is in flight or another connect/disconnect is under way.
    pub async fn connect(&self, port: &str) -> Result<(), BoardError> {
        let previous = {
            let mut cell = self.cell();
            if cell.switching || cell.state == ConnectionState::Busy {
                return Err(BoardError::Busy);
            }
            cell.switching = true;
            match cell.state {
                ConnectionState::Connected => cell.port.clone(),
                _ => None,
            }
        };
        let _switching = SwitchingGuard { connection: self };

        // Uncontended: no transfer can start while switching
        let mut link = self.link.lock().await;

        if let Some(previous) = previous {
            self.close_link(&mut link).await;
            self.events
                .info(format!("Previous connection to {} closed", previous));
        }

        self.events.info(format!("Connecting to board on {}", port));
        match self.connector.open(port).await {
            Ok(opened) => {
                *link = Some(opened);
                self.set_state(ConnectionState::Connected, Some(port.to_string()));
                self.events.success(format!("Board connected on {}", port));
                Ok(())
            }
            Err(e) => {
                self.events.failure(format!("Connection error: {}", e));
                Err(e)
            }
        }
    }

    /// Close the live link. Calling it while already disconnected is a no-op.
    ///
    /// During a transfer the link is closed under it: the transfer fails
    /// with a transport error and this call returns once the link is released.
    pub async fn disconnect(&self) -> Result<(), BoardError> {
        let (port, aborting) = {
            let mut cell = self.cell();
            if cell.switching {
                return Err(BoardError::Busy);
            }
            let aborting = match cell.state {
                ConnectionState::Disconnected => {
                    debug!("Disconnect requested while already disconnected");
                    return Ok(());
                }
                ConnectionState::Busy => {
                    self.closing.send_replace(true);
                    true
                }
                ConnectionState::Connected => false,
            };
            cell.switching = true;
            (cell.port.clone(), aborting)
        };
        let _switching = SwitchingGuard { connection: self };

        if aborting {
            self.events.info("Closing link, aborting the transfer in progress");
        }
        let mut link = self.link.lock().await;
        self.close_link(&mut link).await;
        self.events.info(format!(
            "Board disconnected from {}",
            port.unwrap_or_default()
        ));
        Ok(())
    }

    /// Take the link out before closing it so it is released exactly once.
    async fn close_link(&self, link: &mut Option<Box<dyn RegisterLink>>) {
        self.set_state(ConnectionState::Disconnected, None);
        if let Some(mut old) = link.take() {
            if let Err(e) = old.close().await {
                warn!("Closing link failed, handle dropped anyway: {}", e);
            }
        }
    }

    /// Move `Connected -> Busy` and hand out exclusive access to the link.
    ///
    /// Fails with `NotConnected` or `Busy` without touching the link.
    pub async fn begin_transfer(&self) -> Result<TransferGuard<'_>, BoardError> {
        {
            let mut cell = self.cell();
            if cell.switching {
                return Err(BoardError::Busy);
            }
            match cell.state {
                ConnectionState::Disconnected => return Err(BoardError::NotConnected),
                ConnectionState::Busy => return Err(BoardError::Busy),
                ConnectionState::Connected => {
                    debug!("Connection state connected -> busy");
                    cell.state = ConnectionState::Busy;
                    self.closing.send_replace(false);
                }
            }
        }
        // Created before the await so cancellation still releases Busy
        let mut guard = TransferGuard {
            connection: self,
            link: None,
            closing: self.closing.subscribe(),
        };
        guard.link = Some(self.link.lock().await);
        Ok(guard)
    }

    /// `Busy -> Connected`; invoked by the guard on drop.
    fn end_transfer(&self) {
        let mut cell = self.cell();
        if cell.state == ConnectionState::Busy {
            debug!("Connection state busy -> connected");
            cell.state = ConnectionState::Connected;
        }
    }
}

/// Clears the switching flag when `connect` or `disconnect` ends, even if
/// its future is dropped half-way.
struct SwitchingGuard<'a> {
    connection: &'a BoardConnection,
}

impl Drop for SwitchingGuard<'_> {
    fn drop(&mut self) {
        self.connection.cell().switching = false;
    }
}

/// Exclusive access to the link for the duration of one transfer.
pub struct TransferGuard<'a> {
    connection: &'a BoardConnection,
    link: Option<AsyncMutexGuard<'a, Option<Box<dyn RegisterLink>>>>,
    closing: watch::Receiver<bool>,
}

impl TransferGuard<'_> {
    /// Write one register on the guarded link.
    ///
    /// Fails with a transport error as soon as `disconnect` closes the link,
    /// including while the write is waiting for the board.
    pub async fn write_register(&mut self, write: RegisterWrite) -> Result<(), BoardError> {
        if *self.closing.borrow() {
            return Err(link_closed());
        }
        let Some(link) = self.link.as_mut().and_then(|guard| guard.as_mut()) else {
            return Err(BoardError::NotConnected);
        };

        tokio::select! {
            result = link.write_register(write) => result,
            _ = self.closing.wait_for(|closing| *closing) => Err(link_closed()),
        }
    }
}

fn link_closed() -> BoardError {
    BoardError::transport("Link closed by disconnect during the transfer")
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        // Release the link before announcing Connected
        self.link.take();
        self.connection.end_transfer();
    }
}
