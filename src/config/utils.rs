// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::debug;

use super::{Config, CONFIG_SCHEMA};

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./pattern-board --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema = config_schema()?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// The embedded JSON schema, parsed.
pub fn config_schema() -> Result<serde_json::Value> {
    serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Returns
///
/// * `Ok(())` if all validations pass
/// * `Err(anyhow::Error)` with descriptive message if any validation fails
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if config.serial.port.trim().is_empty() {
        anyhow::bail!("Serial port name must not be empty");
    }

    // Modbus broadcast (0) never answers and 248..=255 are reserved
    if !(1..=247).contains(&config.serial.slave_id) {
        anyhow::bail!(
            "Modbus slave id {} is outside 1..=247",
            config.serial.slave_id
        );
    }

    if config.serial.timeout_ms == 0 {
        anyhow::bail!("Serial timeout must be at least 1 ms");
    }

    Ok(())
}
