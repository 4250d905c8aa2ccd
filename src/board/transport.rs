// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial transport
//!
//! Byte-level serial I/O for the Modbus-RTU link. The port is opened 8N1
//! without flow control at the configured baud rate. Modbus framing lives in
//! the link layer on top of this stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use log::{debug, info};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

use crate::config::SerialConfig;
use crate::error::BoardError;

/// An open serial port.
///
/// Reads and writes go through [`AsyncRead`] / [`AsyncWrite`]; the OS handle
/// is released when the transport is shut down and dropped.
#[derive(Debug)]
pub struct SerialTransport {
    port_name: String,
    stream: SerialStream,
}

impl SerialTransport {
    /// Open `port_name` with the line settings of `config`.
    pub fn open(port_name: &str, config: &SerialConfig) -> Result<Self, BoardError> {
        debug!(
            "Opening serial port {} at {} baud (timeout {} ms)",
            port_name, config.baud_rate, config.timeout_ms
        );
        let stream = tokio_serial::new(port_name, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(config.timeout())
            .open_native_async()
            .map_err(|e| {
                BoardError::transport(format!("Failed to open serial port {}: {}", port_name, e))
            })?;

        // Stale bytes from a previous session would desynchronise RTU framing
        stream.clear(tokio_serial::ClearBuffer::All).map_err(|e| {
            BoardError::transport(format!("Failed to clear serial port {}: {}", port_name, e))
        })?;

        info!("Serial port {} opened", port_name);
        Ok(Self {
            port_name: port_name.to_string(),
            stream,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl AsyncRead for SerialTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SerialTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
