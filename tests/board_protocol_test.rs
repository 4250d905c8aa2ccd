// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! End-to-end tests of the protocol client against the simulated board
//!
//! Every write goes through real Modbus-RTU framing (function 0x06, CRC)
//! over a pseudo-terminal pair to a `BoardSimulator` served by the tokio-modbus
//! RTU server. Pseudo-terminals only exist on unix.

#![cfg(unix)]

use std::sync::Arc;

use pattern_board::board::{
    BoardClient, BoardConnection, ConnectionState, EventBus, EventKind, Pattern, RegisterWrite,
};
use pattern_board::config::{BoardConfig, Config, SettleConfig};
use pattern_board::simulator::{BoardSimulator, SimulatedConnector};
use pattern_board::BoardError;
use tokio_modbus::prelude::ExceptionCode;

fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

/// Connect a client to a fresh simulated board, without settle delays.
async fn simulated_client(
) -> Result<(BoardClient, Arc<BoardConnection>, BoardSimulator), Box<dyn std::error::Error>> {
    init_logger();
    let config = Config::default();
    let board = BoardSimulator::new();
    let connector = SimulatedConnector::new(board.clone(), &config.serial);
    let connection = BoardConnection::shared(Box::new(connector), EventBus::new());
    connection.connect("simulated").await?;

    let board_config = BoardConfig {
        settle: SettleConfig::none(),
        ..BoardConfig::default()
    };
    let client = BoardClient::new(connection.clone(), &board_config);
    Ok((client, connection, board))
}

fn sample_pattern() -> Pattern {
    Pattern::new(vec![vec![1, 2, 3, 10], vec![4, 5, 6, 20]])
}

fn pairs(writes: &[RegisterWrite]) -> Vec<(u16, u16)> {
    writes.iter().map(|w| (w.address(), w.value())).collect()
}

#[tokio::test]
async fn test_store_pattern_reaches_board() -> Result<(), Box<dyn std::error::Error>> {
    let (client, connection, board) = simulated_client().await?;

    let report = client.store_pattern(2, &sample_pattern()).await?;
    assert_eq!(report.writes, 10);
    assert_eq!(report.rows, 2);
    assert!(!report.immediate_run);

    assert_eq!(
        pairs(&board.writes()),
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
    assert_eq!(board.read_pattern(4), Some(sample_pattern()));
    assert_eq!(board.running(), None);

    connection.disconnect().await?;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_slot_zero_starts_immediately() -> Result<(), Box<dyn std::error::Error>> {
    let (client, _connection, board) = simulated_client().await?;

    let report = client.store_pattern(0, &sample_pattern()).await?;
    assert!(report.immediate_run);

    let writes = pairs(&board.writes());
    assert_eq!(writes.len(), 11);
    assert_eq!(writes.last(), Some(&(1000, 1)));
    assert_eq!(board.running(), Some(0));
    Ok(())
}

#[tokio::test]
async fn test_run_and_stop_pattern() -> Result<(), Box<dyn std::error::Error>> {
    let (client, _connection, board) = simulated_client().await?;

    client.run_pattern(5).await?;
    assert_eq!(pairs(&board.writes()), vec![(0x2000, 5), (0x2001, 1)]);
    assert_eq!(board.running(), Some(5));

    client.stop_pattern().await?;
    assert_eq!(board.register(0x2001), Some(0));
    assert_eq!(board.running(), None);
    Ok(())
}

#[tokio::test]
async fn test_board_exception_aborts_transfer() -> Result<(), Box<dyn std::error::Error>> {
    let (client, connection, board) = simulated_client().await?;
    board.fail_at(0x4, ExceptionCode::IllegalDataAddress);
    let mut events = connection.events().subscribe();

    let err = client
        .store_pattern(1, &sample_pattern())
        .await
        .unwrap_err();

    assert_eq!(err.writes_applied(), 4);
    assert!(matches!(
        err,
        BoardError::Aborted {
            written: 4,
            total: 10,
            address: 0x4,
            ..
        }
    ));
    assert!(matches!(err.root_cause(), BoardError::Protocol { .. }));

    // Applied writes stay on the board, later ones were never sent
    assert_eq!(board.writes().len(), 4);
    assert_eq!(board.register(0x5), None);

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event.kind);
    }
    assert_eq!(last, Some(EventKind::Failure));

    // The connection is usable again
    assert_eq!(connection.state(), ConnectionState::Connected);
    client.run_pattern(1).await?;
    assert_eq!(board.running(), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_invalid_requests_never_reach_board() -> Result<(), Box<dyn std::error::Error>> {
    let (client, _connection, board) = simulated_client().await?;

    let ragged = Pattern::new(vec![vec![1, 2, 3], vec![4]]);
    assert!(matches!(
        client.store_pattern(1, &ragged).await,
        Err(BoardError::InvalidPattern { .. })
    ));
    assert!(matches!(
        client.store_pattern(1, &Pattern::new(vec![vec![70000]])).await,
        Err(BoardError::ValueOutOfRange { .. })
    ));
    assert!(matches!(
        client.store_pattern(9, &sample_pattern()).await,
        Err(BoardError::SlotOutOfRange { slot: 9, max: 4 })
    ));

    assert!(board.writes().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reconnect_keeps_working() -> Result<(), Box<dyn std::error::Error>> {
    let (client, connection, board) = simulated_client().await?;

    connection.connect("simulated-again").await?;
    assert_eq!(connection.port().as_deref(), Some("simulated-again"));

    client.store_pattern(3, &sample_pattern()).await?;
    assert_eq!(board.writes().len(), 10);

    connection.disconnect().await?;
    connection.disconnect().await?;
    assert!(matches!(
        client.stop_pattern().await,
        Err(BoardError::NotConnected)
    ));
    Ok(())
}

#[tokio::test]
async fn test_empty_pattern_writes_header_only() -> Result<(), Box<dyn std::error::Error>> {
    let (client, _connection, board) = simulated_client().await?;

    let report = client.store_pattern(4, &Pattern::default()).await?;
    assert_eq!(report.writes, 2);
    assert_eq!(pairs(&board.writes()), vec![(0x0, 4), (0x1, 0)]);
    Ok(())
}
