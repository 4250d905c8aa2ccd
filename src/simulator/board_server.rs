// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus-RTU slave emulating the pattern board firmware
//!
//! As in the rest of the crate, the board is the "server" (Modbus slave) and
//! the protocol client is the "client" (Modbus master).

use std::{
    collections::HashMap,
    future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, error, info};
use tokio_modbus::prelude::*;
#[cfg(unix)]
use tokio_modbus::server::rtu::Server;
#[cfg(unix)]
use tokio_serial::SerialStream;

use crate::board::link::{Connector, RegisterLink, RtuLink};
use crate::board::registers::{
    Pattern, RegisterWrite, DATA_BASE_REGISTER, ROW_COUNT_REGISTER, RUN_FLAG_REGISTER,
    RUN_INDEX_REGISTER, RUN_TRIGGER_REGISTER,
};
use crate::config::SerialConfig;
use crate::error::BoardError;

#[derive(Debug, Default)]
struct BoardState {
    holding_registers: HashMap<u16, u16>,
    writes: Vec<RegisterWrite>,
    faults: HashMap<u16, ExceptionCode>,
    running: Option<u16>,
}

/// Register map and run state of a simulated board.
///
/// Clones share the same state, so a test can keep a handle on the board
/// while the Modbus server task owns another.
#[derive(Debug, Clone, Default)]
pub struct BoardSimulator {
    state: Arc<Mutex<BoardState>>,
}

impl tokio_modbus::server::Service for BoardSimulator {
    type Request = SlaveRequest<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req.request {
            Request::WriteSingleRegister(addr, value) => self
                .register_write(addr, value)
                .map(|_| Response::WriteSingleRegister(addr, value)),
            other => {
                error!("SIMULATOR: Exception::IllegalFunction - Unimplemented function code in request: {other:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

impl BoardSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every write to `address` with `exception`.
    pub fn fail_at(&self, address: u16, exception: ExceptionCode) {
        self.lock().faults.insert(address, exception);
    }

    /// Current value of a holding register, `None` if never written
    pub fn register(&self, address: u16) -> Option<u16> {
        self.lock().holding_registers.get(&address).copied()
    }

    /// Every accepted write, in arrival order
    pub fn writes(&self) -> Vec<RegisterWrite> {
        self.lock().writes.clone()
    }

    /// Index of the running pattern, if any.
    ///
    /// The slot 0 run trigger reports index 0.
    pub fn running(&self) -> Option<u16> {
        self.lock().running
    }

    /// Rebuild the pattern last written to the data region.
    ///
    /// The board does not know the row width, so the caller provides it.
    /// Returns `None` when the row count or a cell was never written.
    pub fn read_pattern(&self, width: usize) -> Option<Pattern> {
        let state = self.lock();
        let rows = *state.holding_registers.get(&ROW_COUNT_REGISTER)? as usize;
        let mut grid = Vec::with_capacity(rows);
        for r in 0..rows {
            let mut row = Vec::with_capacity(width);
            for c in 0..width {
                let address = u16::try_from(DATA_BASE_REGISTER as usize + r * width + c).ok()?;
                row.push(i64::from(*state.holding_registers.get(&address)?));
            }
            grid.push(row);
        }
        Some(Pattern::new(grid))
    }

    fn register_write(&self, addr: u16, value: u16) -> Result<(), ExceptionCode> {
        let mut state = self.lock();
        if let Some(exception) = state.faults.get(&addr).copied() {
            error!("SIMULATOR: {exception:?} on register {addr:#06x}");
            return Err(exception);
        }

        debug!("SIMULATOR: register {:#06x} <- {}", addr, value);
        state.holding_registers.insert(addr, value);
        state.writes.push(RegisterWrite::new(addr, value));

        match (addr, value) {
            (RUN_TRIGGER_REGISTER, 1) => {
                info!("SIMULATOR: running pattern from slot 0");
                state.running = Some(0);
            }
            (RUN_FLAG_REGISTER, 1) => {
                let index = state
                    .holding_registers
                    .get(&RUN_INDEX_REGISTER)
                    .copied()
                    .unwrap_or_default();
                info!("SIMULATOR: running pattern {}", index);
                state.running = Some(index);
            }
            (RUN_FLAG_REGISTER, 0) => {
                info!("SIMULATOR: pattern stopped");
                state.running = None;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Opens Modbus-RTU links to a [`BoardSimulator`] over a pseudo-terminal pair.
///
/// Each `open` spawns a server task on the current Tokio runtime; the task
/// ends when the client side of the pair is closed. Pseudo-terminals only
/// exist on unix; elsewhere `open` fails with a transport error.
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    board: BoardSimulator,
    slave_id: u8,
    timeout: Duration,
}

impl SimulatedConnector {
    pub fn new(board: BoardSimulator, serial: &SerialConfig) -> Self {
        Self {
            board,
            slave_id: serial.slave_id,
            timeout: serial.timeout(),
        }
    }

    pub fn board(&self) -> &BoardSimulator {
        &self.board
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    #[cfg(unix)]
    async fn open(&self, port: &str) -> Result<Box<dyn RegisterLink>, BoardError> {
        let (client_end, board_end) = SerialStream::pair().map_err(|e| {
            BoardError::transport(format!("Failed to create simulated serial pair: {}", e))
        })?;

        let server = Server::new(board_end);
        let service = self.board.clone();
        let port_name = port.to_string();
        tokio::spawn(async move {
            if let Err(e) = server.serve_forever(service).await {
                debug!("SIMULATOR: server on {} stopped: {}", port_name, e);
            }
        });

        info!("Simulated board attached on {}", port);
        Ok(Box::new(RtuLink::attach(
            client_end,
            self.slave_id,
            self.timeout,
        )))
    }

    #[cfg(not(unix))]
    async fn open(&self, port: &str) -> Result<Box<dyn RegisterLink>, BoardError> {
        Err(BoardError::transport(format!(
            "Simulated board on {} needs a unix pseudo-terminal",
            port
        )))
    }
}
