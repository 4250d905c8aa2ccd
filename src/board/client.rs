// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Pattern board protocol client
//!
//! Turns store / run / stop requests into paced register writes over a
//! [`BoardConnection`]. Writes are sent strictly one at a time; each one is
//! followed by the settle delay of its phase so the firmware can finish its
//! internal write cycle before the next request arrives.
//!
//! A sequence stops at the first failing write. Registers written before the
//! failure stay on the board and are reported through
//! [`BoardError::Aborted`]; nothing is retried or rolled back.
//!
//! # Example
//!
//! ```no_run
//! use pattern_board::board::{BoardClient, BoardConnection, EventBus, Pattern, SerialConnector};
//! use pattern_board::config::Config;
//!
//! # async fn demo() -> Result<(), pattern_board::BoardError> {
//! let config = Config::default();
//! let connection = BoardConnection::shared(
//!     Box::new(SerialConnector::new(config.serial.clone())),
//!     EventBus::new(),
//! );
//! connection.connect(&config.serial.port).await?;
//!
//! let client = BoardClient::new(connection.clone(), &config.board);
//! let pattern = Pattern::new(vec![vec![1, 2, 3, 10], vec![4, 5, 6, 20]]);
//! let report = client.store_pattern(2, &pattern).await?;
//! println!("{} registers written", report.writes);
//!
//! client.run_pattern(2).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::board::connection::{BoardConnection, TransferGuard};
use crate::board::registers::{
    encode_run, encode_stop, encode_store, Pattern, RegisterWrite, Slot, WritePhase,
};
use crate::config::{BoardConfig, SettleConfig};
use crate::error::BoardError;

/// Summary of a completed store operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    /// Registers written, header and run trigger included
    pub writes: usize,
    pub rows: usize,
    /// The pattern was stored in slot 0 and started right away
    pub immediate_run: bool,
}

/// Protocol client for one board connection.
///
/// Cheap to clone; clones share the same connection and therefore the same
/// `Busy` state.
#[derive(Clone)]
pub struct BoardClient {
    connection: Arc<BoardConnection>,
    settle: SettleConfig,
    max_slot: u16,
}

impl BoardClient {
    pub fn new(connection: Arc<BoardConnection>, config: &BoardConfig) -> Self {
        Self {
            connection,
            settle: config.settle.clone(),
            max_slot: config.max_slot,
        }
    }

    pub fn connection(&self) -> &Arc<BoardConnection> {
        &self.connection
    }

    /// Store `pattern` in `slot`; slot 0 starts it immediately.
    ///
    /// The connection state is checked first, then the slot and every cell,
    /// so a rejected request never reaches the board.
    pub async fn store_pattern(
        &self,
        slot: u16,
        pattern: &Pattern,
    ) -> Result<TransferReport, BoardError> {
        let mut guard = self.connection.begin_transfer().await?;
        let events = self.connection.events();

        let sequence = match Slot::new(slot, self.max_slot)
            .and_then(|slot| encode_store(slot, pattern))
        {
            Ok(sequence) => sequence,
            Err(e) => {
                events.failure(format!("Pattern rejected: {}", e));
                return Err(e);
            }
        };

        let rows = sequence.rows();
        let width = pattern.rows().first().map_or(0, Vec::len);
        events.info(format!(
            "Storing pattern: {} rows of {} values to slot {}",
            rows, width, slot
        ));

        let total = sequence.len();
        let mut cells = 0usize;
        let mut result = Ok(());
        for (written, (phase, write)) in sequence.iter().enumerate() {
            if let Err(e) = self
                .write_paced(&mut guard, phase, write, written, total)
                .await
            {
                result = Err(e);
                break;
            }
            if phase == WritePhase::Data {
                cells += 1;
                if cells.checked_rem(width) == Some(0) {
                    events.progress(format!("Row {}/{} written", cells / width, rows));
                }
            }
        }

        match result {
            Ok(()) => {
                let report = TransferReport {
                    writes: total,
                    rows,
                    immediate_run: sequence.immediate_run(),
                };
                if report.immediate_run {
                    events.success(format!(
                        "Pattern stored and started ({} registers written)",
                        total
                    ));
                } else {
                    events.success(format!(
                        "Pattern stored in slot {} ({} registers written)",
                        slot, total
                    ));
                }
                Ok(report)
            }
            Err(e) => {
                events.failure(format!("Pattern transfer failed: {}", e));
                Err(e)
            }
        }
    }

    /// Start the pattern stored at `index` through the run-control pair.
    pub async fn run_pattern(&self, index: u16) -> Result<(), BoardError> {
        let mut guard = self.connection.begin_transfer().await?;
        let events = self.connection.events();
        events.info(format!("Starting pattern {}", index));

        match self.send_control(&mut guard, &encode_run(index)).await {
            Ok(()) => {
                events.success(format!("Pattern {} started", index));
                Ok(())
            }
            Err(e) => {
                events.failure(format!("Failed to start pattern {}: {}", index, e));
                Err(e)
            }
        }
    }

    /// Stop the running pattern.
    pub async fn stop_pattern(&self) -> Result<(), BoardError> {
        let mut guard = self.connection.begin_transfer().await?;
        let events = self.connection.events();
        events.info("Stopping pattern");

        match self.send_control(&mut guard, &encode_stop()).await {
            Ok(()) => {
                events.success("Pattern stopped");
                Ok(())
            }
            Err(e) => {
                events.failure(format!("Failed to stop pattern: {}", e));
                Err(e)
            }
        }
    }

    async fn send_control(
        &self,
        guard: &mut TransferGuard<'_>,
        writes: &[RegisterWrite],
    ) -> Result<(), BoardError> {
        for (written, write) in writes.iter().enumerate() {
            self.write_paced(guard, WritePhase::RunControl, *write, written, writes.len())
                .await?;
        }
        Ok(())
    }

    /// Write one register, then wait for the settle delay of `phase`.
    async fn write_paced(
        &self,
        guard: &mut TransferGuard<'_>,
        phase: WritePhase,
        write: RegisterWrite,
        written: usize,
        total: usize,
    ) -> Result<(), BoardError> {
        guard
            .write_register(write)
            .await
            .map_err(|source| BoardError::Aborted {
                written,
                total,
                address: write.address(),
                source: Box::new(source),
            })?;

        let delay = self.settle.delay_for(phase);
        if !delay.is_zero() {
            debug!(
                "Settling {} ms after register {:#06x}",
                delay.as_millis(),
                write.address()
            );
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::connection::ConnectionState;
    use crate::board::events::{EventBus, EventKind};
    use crate::board::link::{MockConnector, MockRegisterLink};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    type WriteLog = Arc<Mutex<Vec<(RegisterWrite, Instant)>>>;

    fn init_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }

    /// Connector whose links record every write; the write at `fail_at`
    /// fails with a transport error.
    fn recording_connector(log: WriteLog, fail_at: Option<usize>) -> MockConnector {
        let mut connector = MockConnector::new();
        connector.expect_open().returning(move |_| {
            let log = log.clone();
            let mut link = MockRegisterLink::new();
            link.expect_write_register().returning(move |write| {
                let mut log = log.lock().unwrap();
                if Some(log.len()) == fail_at {
                    return Err(BoardError::transport("link lost"));
                }
                log.push((write, Instant::now()));
                Ok(())
            });
            link.expect_close().returning(|| Ok(()));
            Ok(Box::new(link))
        });
        connector
    }

    async fn connected_client(
        log: WriteLog,
        fail_at: Option<usize>,
        settle: SettleConfig,
    ) -> BoardClient {
        init_logger();
        let connection =
            BoardConnection::shared(Box::new(recording_connector(log, fail_at)), EventBus::new());
        connection.connect("/dev/ttyUSB0").await.unwrap();
        let config = BoardConfig {
            settle,
            ..BoardConfig::default()
        };
        BoardClient::new(connection, &config)
    }

    fn written(log: &WriteLog) -> Vec<(u16, u16)> {
        log.lock()
            .unwrap()
            .iter()
            .map(|(w, _)| (w.address(), w.value()))
            .collect()
    }

    fn sample_pattern() -> Pattern {
        Pattern::new(vec![vec![1, 2, 3, 10], vec![4, 5, 6, 20]])
    }

    #[tokio::test]
    async fn test_store_writes_in_protocol_order() {
        let log = WriteLog::default();
        let client = connected_client(log.clone(), None, SettleConfig::none()).await;

        let report = client.store_pattern(2, &sample_pattern()).await.unwrap();

        assert_eq!(
            written(&log),
            vec![
                (0x0, 2),
                (0x1, 2),
                (0x2, 1),
                (0x3, 2),
                (0x4, 3),
                (0x5, 10),
                (0x6, 4),
                (0x7, 5),
                (0x8, 6),
                (0x9, 20),
            ]
        );
        assert_eq!(
            report,
            TransferReport {
                writes: 10,
                rows: 2,
                immediate_run: false
            }
        );
        assert_eq!(client.connection().state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_store_slot_zero_ends_with_run_trigger() {
        let log = WriteLog::default();
        let client = connected_client(log.clone(), None, SettleConfig::none()).await;

        let report = client.store_pattern(0, &sample_pattern()).await.unwrap();

        let writes = written(&log);
        assert_eq!(writes.len(), 11);
        assert_eq!(writes[0], (0x0, 0));
        assert_eq!(writes[10], (1000, 1));
        assert!(report.immediate_run);
    }

    #[tokio::test]
    async fn test_store_reports_progress_per_row() {
        let log = WriteLog::default();
        let client = connected_client(log, None, SettleConfig::none()).await;
        let mut events = client.connection().events().subscribe();

        client.store_pattern(3, &sample_pattern()).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::Info,
                EventKind::Progress,
                EventKind::Progress,
                EventKind::Success
            ]
        );
    }

    #[tokio::test]
    async fn test_store_requires_connection() {
        let connection = BoardConnection::shared(Box::new(MockConnector::new()), EventBus::new());
        let client = BoardClient::new(connection, &BoardConfig::default());

        let result = client.store_pattern(1, &sample_pattern()).await;
        assert!(matches!(result, Err(BoardError::NotConnected)));
        assert!(matches!(
            client.run_pattern(1).await,
            Err(BoardError::NotConnected)
        ));
        assert!(matches!(
            client.stop_pattern().await,
            Err(BoardError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_store_while_busy_writes_nothing() {
        let log = WriteLog::default();
        let client = connected_client(log.clone(), None, SettleConfig::none()).await;

        let guard = client.connection().begin_transfer().await.unwrap();
        let result = client.store_pattern(1, &sample_pattern()).await;
        assert!(matches!(result, Err(BoardError::Busy)));
        assert!(matches!(client.run_pattern(1).await, Err(BoardError::Busy)));
        drop(guard);

        assert!(written(&log).is_empty());
        assert_eq!(client.connection().state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_rejected_pattern_writes_nothing() {
        let log = WriteLog::default();
        let client = connected_client(log.clone(), None, SettleConfig::none()).await;

        let ragged = Pattern::new(vec![vec![1, 2, 3], vec![4, 5]]);
        assert!(matches!(
            client.store_pattern(1, &ragged).await,
            Err(BoardError::InvalidPattern { .. })
        ));

        let negative = Pattern::new(vec![vec![1, -2]]);
        assert!(matches!(
            client.store_pattern(1, &negative).await,
            Err(BoardError::ValueOutOfRange {
                row: 0,
                column: 1,
                value: -2
            })
        ));

        assert!(matches!(
            client.store_pattern(5, &sample_pattern()).await,
            Err(BoardError::SlotOutOfRange { slot: 5, max: 4 })
        ));

        assert!(written(&log).is_empty());
        assert_eq!(client.connection().state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_store_aborts_at_first_failure() {
        let log = WriteLog::default();
        let client = connected_client(log.clone(), Some(4), SettleConfig::none()).await;

        let err = client
            .store_pattern(2, &sample_pattern())
            .await
            .unwrap_err();

        match &err {
            BoardError::Aborted {
                written,
                total,
                address,
                ..
            } => {
                assert_eq!(*written, 4);
                assert_eq!(*total, 10);
                assert_eq!(*address, 0x4);
            }
            other => panic!("expected Aborted, got {other:?}"),
        }
        assert!(matches!(err.root_cause(), BoardError::Transport { .. }));
        assert_eq!(written(&log).len(), 4);
        assert_eq!(client.connection().state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_run_and_stop_use_run_control_pair() {
        let log = WriteLog::default();
        let client = connected_client(log.clone(), None, SettleConfig::none()).await;

        client.run_pattern(5).await.unwrap();
        client.stop_pattern().await.unwrap();

        assert_eq!(
            written(&log),
            vec![(0x2000, 5), (0x2001, 1), (0x2001, 0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delays_follow_write_phase() {
        let log = WriteLog::default();
        let client = connected_client(log.clone(), None, SettleConfig::default()).await;

        let start = Instant::now();
        client.store_pattern(0, &sample_pattern()).await.unwrap();
        let elapsed = start.elapsed();

        let offsets: Vec<u128> = log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| at.duration_since(start).as_millis())
            .collect();
        // Two header writes at 100 ms each, eight cells at 10 ms, then the trigger
        assert_eq!(
            offsets,
            vec![0, 100, 200, 210, 220, 230, 240, 250, 260, 270, 280]
        );
        assert!(elapsed >= Duration::from_millis(290));
        assert!(elapsed < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_transfer_releases_busy() {
        let log = WriteLog::default();
        let client = connected_client(log.clone(), None, SettleConfig::default()).await;

        let task_client = client.clone();
        let handle = tokio::spawn(async move {
            let pattern = sample_pattern();
            task_client.store_pattern(2, &pattern).await
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(client.connection().state(), ConnectionState::Busy);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        assert_eq!(client.connection().state(), ConnectionState::Connected);
        assert_eq!(written(&log).len(), 2);
        client.stop_pattern().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_aborts_transfer_in_progress() {
        let log = WriteLog::default();
        let client = connected_client(log.clone(), None, SettleConfig::default()).await;

        let task_client = client.clone();
        let handle = tokio::spawn(async move {
            let pattern = sample_pattern();
            task_client.store_pattern(2, &pattern).await
        });

        // Second header write done, settling until 200 ms
        tokio::time::sleep(Duration::from_millis(150)).await;
        client.connection().disconnect().await.unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            BoardError::Aborted {
                written: 2,
                total: 10,
                address: 0x2,
                ..
            }
        ));
        assert!(matches!(err.root_cause(), BoardError::Transport { .. }));
        assert_eq!(written(&log).len(), 2);
        assert_eq!(client.connection().state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.stop_pattern().await,
            Err(BoardError::NotConnected)
        ));
    }
}
