// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register links: the seam between the protocol client and the wire
//!
//! A [`RegisterLink`] writes one holding register at a time. The production
//! implementation, [`RtuLink`], sends each write as a standard Modbus-RTU
//! "write single register" request (function code 0x06) and bounds every
//! request with the configured timeout. A [`Connector`] opens links by port
//! name so the connection state machine never deals with serial details.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_modbus::client::{rtu, Client, Context, Writer};
use tokio_modbus::Slave;

use crate::board::registers::RegisterWrite;
use crate::board::transport::SerialTransport;
use crate::config::SerialConfig;
use crate::error::BoardError;

/// Writes holding registers on the board, one request per call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegisterLink: Send {
    /// Write a single holding register and wait for the board's echo.
    async fn write_register(&mut self, write: RegisterWrite) -> Result<(), BoardError>;

    /// Release the underlying port.
    async fn close(&mut self) -> Result<(), BoardError>;
}

/// Opens register links by port name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, port: &str) -> Result<Box<dyn RegisterLink>, BoardError>;
}

/// Modbus-RTU client over any async byte stream.
pub struct RtuLink {
    ctx: Context,
    timeout: Duration,
}

impl RtuLink {
    /// Attach a Modbus-RTU client context for `slave_id` to `transport`.
    pub fn attach<T>(transport: T, slave_id: u8, timeout: Duration) -> Self
    where
        T: AsyncRead + AsyncWrite + Debug + Unpin + Send + 'static,
    {
        Self {
            ctx: rtu::attach_slave(transport, Slave(slave_id)),
            timeout,
        }
    }
}

#[async_trait]
impl RegisterLink for RtuLink {
    async fn write_register(&mut self, write: RegisterWrite) -> Result<(), BoardError> {
        let (address, value) = (write.address(), write.value());
        debug!("Writing register {:#06x} = {}", address, value);

        let response = tokio::time::timeout(
            self.timeout,
            self.ctx.write_single_register(address, value),
        )
        .await
        .map_err(|_| {
            BoardError::transport(format!(
                "No response for register {:#06x} within {} ms",
                address,
                self.timeout.as_millis()
            ))
        })?;

        match response {
            Ok(Ok(())) => Ok(()),
            Ok(Err(exception)) => Err(BoardError::protocol(format!(
                "Board answered register {:#06x} with exception {:?}",
                address, exception
            ))),
            Err(tokio_modbus::Error::Transport(e)) => Err(BoardError::transport(format!(
                "I/O error writing register {:#06x}: {}",
                address, e
            ))),
            Err(tokio_modbus::Error::Protocol(e)) => Err(BoardError::protocol(format!(
                "Unexpected response writing register {:#06x}: {}",
                address, e
            ))),
        }
    }

    async fn close(&mut self) -> Result<(), BoardError> {
        debug!("Disconnecting Modbus-RTU context");
        self.ctx.disconnect().await.map_err(|e| {
            warn!("Error while closing Modbus-RTU link: {}", e);
            BoardError::transport(format!("Failed to close link: {}", e))
        })?;
        Ok(())
    }
}

/// Opens Modbus-RTU links over real serial ports.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    serial: SerialConfig,
}

impl SerialConnector {
    pub fn new(serial: SerialConfig) -> Self {
        Self { serial }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self, port: &str) -> Result<Box<dyn RegisterLink>, BoardError> {
        let transport = SerialTransport::open(port, &self.serial)?;
        debug!(
            "Attaching Modbus-RTU slave {} on {}",
            self.serial.slave_id,
            transport.port_name()
        );
        Ok(Box::new(RtuLink::attach(
            transport,
            self.serial.slave_id,
            self.serial.timeout(),
        )))
    }
}
