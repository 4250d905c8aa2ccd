// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pattern-board project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register codec for the pattern sequencer board
//!
//! Pure mapping from a slot and a pattern grid to the ordered list of
//! holding-register writes the board firmware expects. No I/O happens here.
//!
//! ## Register Map
//!
//! | Register Address | Description | Value |
//! |-----------------|-------------|-------|
//! | 0x0000 | Location | target slot (0 = run immediately) |
//! | 0x0001 | Row count | number of pattern rows |
//! | 0x0002.. | Data region | cell `(r, c)` at `0x0002 + r * width + c` |
//! | 1000 | Run trigger | `1`, written only after a slot 0 store |
//! | 0x2000 | Run index | pattern index to start |
//! | 0x2001 | Run flag | `1` starts, `0` stops |
//!
//! The slot 0 run trigger and the run-control pair are two independent ways
//! of starting execution; the firmware may rely on either one.

use serde::{Deserialize, Serialize};

use crate::error::BoardError;

/// Location register, holds the requested slot
pub const LOCATION_REGISTER: u16 = 0x0;
/// Row count register
pub const ROW_COUNT_REGISTER: u16 = 0x1;
/// First address of the data region
pub const DATA_BASE_REGISTER: u16 = 0x2;
/// Written with `1` after a slot 0 store to start the pattern
pub const RUN_TRIGGER_REGISTER: u16 = 1000;
/// Pattern index for the run-control pair
pub const RUN_INDEX_REGISTER: u16 = 0x2000;
/// Start (`1`) / stop (`0`) flag for the run-control pair
pub const RUN_FLAG_REGISTER: u16 = 0x2001;

/// Number of channel columns on the board
pub const CHANNEL_COUNT: usize = 18;
/// Channel columns plus the trailing time column
pub const PATTERN_COLUMNS: usize = CHANNEL_COUNT + 1;
/// Highest slot observed on the board
pub const DEFAULT_MAX_SLOT: u16 = 4;

/// A single holding-register write, the unit of transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterWrite {
    address: u16,
    value: u16,
}

impl RegisterWrite {
    pub const fn new(address: u16, value: u16) -> Self {
        Self { address, value }
    }

    pub const fn address(&self) -> u16 {
        self.address
    }

    pub const fn value(&self) -> u16 {
        self.value
    }
}

impl From<(u16, u16)> for RegisterWrite {
    fn from((address, value): (u16, u16)) -> Self {
        Self::new(address, value)
    }
}

/// Storage location on the board.
///
/// Slot 0 does not persist anything: the pattern is transferred and
/// started right away through the run trigger register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot(u16);

impl Slot {
    /// The immediate-execution slot
    pub const IMMEDIATE: Slot = Slot(0);

    /// Validate a slot number against the highest slot the board supports
    pub fn new(slot: u16, max_slot: u16) -> Result<Self, BoardError> {
        if slot > max_slot {
            return Err(BoardError::SlotOutOfRange {
                slot,
                max: max_slot,
            });
        }
        Ok(Slot(slot))
    }

    pub fn number(&self) -> u16 {
        self.0
    }

    pub fn is_immediate(&self) -> bool {
        self.0 == 0
    }
}

/// A pattern grid: rows of channel values followed by a time value.
///
/// The grid is handed to the protocol layer by reference for one transfer
/// and never retained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    rows: Vec<Vec<i64>>,
}

impl Pattern {
    pub fn new(rows: Vec<Vec<i64>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<i64>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Check that every row has the width of the first one.
    ///
    /// Returns the common row width, `0` for a pattern without rows.
    pub fn validate_shape(&self) -> Result<usize, BoardError> {
        let Some(first) = self.rows.first() else {
            return Ok(0);
        };
        let width = first.len();
        if width == 0 {
            return Err(BoardError::invalid_pattern("rows must not be empty"));
        }
        for (index, row) in self.rows.iter().enumerate() {
            if row.len() != width {
                return Err(BoardError::invalid_pattern(format!(
                    "row {} has {} cells, expected {}",
                    index,
                    row.len(),
                    width
                )));
            }
        }
        Ok(width)
    }
}

impl From<Vec<Vec<i64>>> for Pattern {
    fn from(rows: Vec<Vec<i64>>) -> Self {
        Self::new(rows)
    }
}

/// Which part of the protocol a write belongs to; drives the settle delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    /// Location and row count
    Header,
    /// Pattern cells
    Data,
    /// Slot 0 run trigger
    RunTrigger,
    /// Run index / run flag pair
    RunControl,
}

/// Ordered writes for one store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSequence {
    writes: Vec<RegisterWrite>,
    rows: usize,
    data_len: usize,
    immediate_run: bool,
}

/// Header writes preceding the data region
const HEADER_LEN: usize = 2;

impl StoreSequence {
    pub fn writes(&self) -> &[RegisterWrite] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Number of pattern rows carried by the sequence
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Whether the sequence ends with the run trigger
    pub fn immediate_run(&self) -> bool {
        self.immediate_run
    }

    /// Phase of the write at `index`
    pub fn phase_of(&self, index: usize) -> WritePhase {
        if index < HEADER_LEN {
            WritePhase::Header
        } else if index < HEADER_LEN + self.data_len {
            WritePhase::Data
        } else {
            WritePhase::RunTrigger
        }
    }

    /// Writes paired with their phase, in transmission order
    pub fn iter(&self) -> impl Iterator<Item = (WritePhase, RegisterWrite)> + '_ {
        self.writes
            .iter()
            .enumerate()
            .map(|(index, write)| (self.phase_of(index), *write))
    }
}

/// Encode a store operation.
///
/// Produces the location and row-count writes, then every cell in row-major
/// order, then the run trigger when `slot` is the immediate slot. Nothing is
/// produced for a ragged pattern or a cell that does not fit in 16 bits.
pub fn encode_store(slot: Slot, pattern: &Pattern) -> Result<StoreSequence, BoardError> {
    let width = pattern.validate_shape()?;
    let rows = pattern.row_count();

    let row_count = u16::try_from(rows).map_err(|_| {
        BoardError::invalid_pattern(format!("{} rows exceed the row count register", rows))
    })?;
    let data_len = rows
        .checked_mul(width)
        .filter(|cells| DATA_BASE_REGISTER as usize + cells <= u16::MAX as usize + 1)
        .ok_or_else(|| {
            BoardError::invalid_pattern(format!(
                "{} rows of {} cells exceed the register address space",
                rows, width
            ))
        })?;

    let mut writes = Vec::with_capacity(HEADER_LEN + data_len + 1);
    writes.push(RegisterWrite::new(LOCATION_REGISTER, slot.number()));
    writes.push(RegisterWrite::new(ROW_COUNT_REGISTER, row_count));

    for (r, row) in pattern.rows().iter().enumerate() {
        for (c, &cell) in row.iter().enumerate() {
            let value = u16::try_from(cell).map_err(|_| BoardError::ValueOutOfRange {
                row: r,
                column: c,
                value: cell,
            })?;
            // Bounded by the address space check above
            let address = DATA_BASE_REGISTER + (r * width + c) as u16;
            writes.push(RegisterWrite::new(address, value));
        }
    }

    if slot.is_immediate() {
        writes.push(RegisterWrite::new(RUN_TRIGGER_REGISTER, 1));
    }

    Ok(StoreSequence {
        writes,
        rows,
        data_len,
        immediate_run: slot.is_immediate(),
    })
}

/// Encode a run request through the run-control pair: index first, then the start flag.
pub fn encode_run(index: u16) -> [RegisterWrite; 2] {
    [
        RegisterWrite::new(RUN_INDEX_REGISTER, index),
        RegisterWrite::new(RUN_FLAG_REGISTER, 1),
    ]
}

/// Encode a stop request: clear the run flag.
pub fn encode_stop() -> [RegisterWrite; 1] {
    [RegisterWrite::new(RUN_FLAG_REGISTER, 0)]
}
