// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Command line client for the pattern sequencer board

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::debug;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::broadcast::{self, error::RecvError};

use pattern_board::board::{
    BoardClient, BoardConnection, BoardEvent, Connector, EventBus, EventKind, Pattern,
    SerialConnector,
};
use pattern_board::config::{output_config_schema, Config};
use pattern_board::simulator::{BoardSimulator, SimulatedConnector};

/// Store and start patterns on a pattern sequencer board over Modbus-RTU
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file, created with default values when missing
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Serial port, overrides the configuration file
    #[arg(short, long)]
    port: Option<String>,

    /// Modbus slave id of the board, overrides the configuration file
    #[arg(long)]
    slave: Option<u8>,

    /// Talk to a simulated board instead of the serial port
    #[arg(long)]
    simulate: bool,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    show_config_schema: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a pattern in a slot; slot 0 starts it right away
    Store {
        /// Storage slot
        #[arg(long)]
        slot: u16,

        /// Pattern file (YAML or JSON with a `rows` list)
        #[arg(long)]
        pattern: PathBuf,
    },
    /// Start a stored pattern
    Run {
        /// Pattern index
        #[arg(long)]
        index: u16,
    },
    /// Stop the running pattern
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    if args.show_config_schema {
        return output_config_schema();
    }

    let Some(command) = args.command else {
        anyhow::bail!("No command given, see --help");
    };

    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    config.apply_args(args.port, args.slave);
    config.validate()?;
    debug!("Effective configuration: {:?}", config);

    // Parse the pattern before touching the board
    let pattern = match &command {
        Command::Store { pattern, .. } => Some(load_pattern(pattern)?),
        _ => None,
    };

    let board = BoardSimulator::new();
    let connector: Box<dyn Connector> = if args.simulate {
        Box::new(SimulatedConnector::new(board.clone(), &config.serial))
    } else {
        Box::new(SerialConnector::new(config.serial.clone()))
    };

    let events = EventBus::new();
    let printer = tokio::spawn(print_events(events.subscribe()));
    let connection = BoardConnection::shared(connector, events);

    let outcome = execute(&connection, &config, command, pattern.as_ref()).await;

    if let Err(e) = connection.disconnect().await {
        debug!("Disconnect failed: {}", e);
    }
    // Closing the last sender ends the printer
    drop(connection);
    if let Err(e) = printer.await {
        debug!("Event printer stopped abnormally: {}", e);
    }

    if args.simulate && outcome.is_ok() {
        println!(
            "Simulated board: {} registers written, running pattern: {}",
            board.writes().len(),
            board
                .running()
                .map_or_else(|| "none".to_string(), |index| index.to_string())
        );
    }

    outcome
}

async fn execute(
    connection: &Arc<BoardConnection>,
    config: &Config,
    command: Command,
    pattern: Option<&Pattern>,
) -> Result<()> {
    connection.connect(&config.serial.port).await?;
    let client = BoardClient::new(connection.clone(), &config.board);

    match (command, pattern) {
        (Command::Store { slot, .. }, Some(pattern)) => {
            let report = client.store_pattern(slot, pattern).await?;
            debug!("Transfer report: {:?}", report);
        }
        (Command::Store { .. }, None) => anyhow::bail!("No pattern loaded"),
        (Command::Run { index }, _) => client.run_pattern(index).await?,
        (Command::Stop, _) => client.stop_pattern().await?,
    }
    Ok(())
}

fn load_pattern(path: &Path) -> Result<Pattern> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read pattern file at {:?}", path))?;
    serde_yml::from_str(&contents)
        .with_context(|| format!("Failed to parse pattern file {:?}", path))
}

async fn print_events(mut receiver: broadcast::Receiver<BoardEvent>) {
    loop {
        match receiver.recv().await {
            Ok(event) => print_event(&event),
            Err(RecvError::Lagged(missed)) => println!("... {} events skipped", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &BoardEvent) {
    let tag = match event.kind {
        EventKind::Info => "INFO",
        EventKind::Progress => "....",
        EventKind::Success => " OK ",
        EventKind::Failure => "FAIL",
    };
    println!(
        "[{}] [{}] {}",
        event.timestamp.format("%H:%M:%S%.3f"),
        tag,
        event.message
    );
}
