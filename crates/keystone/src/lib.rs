//! # Keystone - crash-safe persisted counter
//!
//! A single signed 64-bit value stored redundantly in a small fixed region of
//! a file. Every structural mutation in tablestack that must survive power
//! loss (a table's committed row count, for example) is funnelled through a
//! keystone.
//!
//! ## On-disk layout
//!
//! ```text
//! offset
//!   │
//!   v
//! ┌──────────┬──────────┬──────────┬───────┐
//! │ cell 0   │ cell 1   │ [cell 2] │ index │
//! │ i64 BE   │ i64 BE   │ i64 BE   │ u8    │
//! └──────────┴──────────┴──────────┴───────┘
//! ```
//!
//! The trailing index byte names the active cell. An update writes the new
//! value into the *next* cell (round-robin, never the active one), forces it,
//! then writes the index byte. The index byte is the commit point: a crash
//! anywhere before it lands leaves the previous index/value pair intact.
//!
//! ## Rolling commits
//!
//! With `rolling_commit = true` the final force of the index byte is skipped
//! so that many updates can share one [`Keystone::commit`]. Two consecutive
//! rolling updates on a 2-cell keystone can overwrite the cell the durable
//! index still points at; the 3-cell layout keeps two rolling updates safe.
//!
//! ## Example
//!
//! ```rust,no_run
//! use keystone::{Cells, Keystone};
//! use std::fs::OpenOptions;
//!
//! let file = OpenOptions::new().read(true).write(true).create(true).open("count.ks").unwrap();
//! let mut ks = Keystone::create(file, 0, 0, Cells::Three).unwrap();
//! ks.increment(5, false).unwrap();
//! assert_eq!(ks.get(), 5);
//! ```

use byteorder::{BigEndian, ByteOrder};
use log::trace;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;

/// Width of one value cell in bytes.
pub const CELL_BYTES: u64 = 8;

/// Errors raised by keystone operations.
#[derive(Debug, Error)]
pub enum KeystoneError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file ends before the keystone region does.
    #[error("keystone region truncated: need {needed} bytes at offset {offset}, file has {len}")]
    Truncated { offset: u64, needed: u64, len: u64 },

    /// The index byte names a cell that does not exist.
    #[error("keystone index byte {index} out of range for {cells} cells")]
    BadIndex { index: u8, cells: u8 },
}

pub type Result<T> = std::result::Result<T, KeystoneError>;

/// Number of redundant value cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cells {
    Two,
    Three,
}

impl Cells {
    #[must_use]
    pub fn count(self) -> u8 {
        match self {
            Cells::Two => 2,
            Cells::Three => 3,
        }
    }

    /// Parses a persisted cell count.
    #[must_use]
    pub fn from_count(count: u8) -> Option<Self> {
        match count {
            2 => Some(Cells::Two),
            3 => Some(Cells::Three),
            _ => None,
        }
    }

    /// Total size of the keystone region: the cells plus the index byte.
    #[must_use]
    pub fn region_len(self) -> u64 {
        self.count() as u64 * CELL_BYTES + 1
    }
}

/// Crash-safe counter bound to a region of a file.
///
/// The keystone owns its file handle; callers sharing a file with other
/// structures (a table header, say) should hand it a dedicated handle so
/// the seek cursor is not shared.
pub struct Keystone {
    file: File,
    offset: u64,
    cells: Cells,
    active: u8,
    value: i64,
}

impl std::fmt::Debug for Keystone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystone")
            .field("offset", &self.offset)
            .field("cells", &self.cells)
            .field("active", &self.active)
            .field("value", &self.value)
            .finish()
    }
}

impl Keystone {
    /// Initializes a new keystone region at `offset` holding `initial`.
    ///
    /// Every cell is written with `initial`, the index byte is set to 0, and
    /// the region is forced to stable storage before returning.
    pub fn create(mut file: File, offset: u64, initial: i64, cells: Cells) -> Result<Self> {
        let mut region = vec![0u8; cells.region_len() as usize];
        for cell in region.chunks_exact_mut(CELL_BYTES as usize) {
            BigEndian::write_i64(cell, initial);
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&region)?;
        file.sync_data()?;

        Ok(Self {
            file,
            offset,
            cells,
            active: 0,
            value: initial,
        })
    }

    /// Loads an existing keystone region at `offset`.
    ///
    /// # Errors
    ///
    /// [`KeystoneError::Truncated`] if the file is too short to hold the
    /// region, [`KeystoneError::BadIndex`] if the index byte is out of range.
    pub fn open(mut file: File, offset: u64, cells: Cells) -> Result<Self> {
        let needed = cells.region_len();
        let len = file.metadata()?.len();
        if len < offset + needed {
            return Err(KeystoneError::Truncated {
                offset,
                needed,
                len,
            });
        }

        let mut region = vec![0u8; needed as usize];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut region)?;

        let active = region[needed as usize - 1];
        if active >= cells.count() {
            return Err(KeystoneError::BadIndex {
                index: active,
                cells: cells.count(),
            });
        }
        let start = active as usize * CELL_BYTES as usize;
        let value = BigEndian::read_i64(&region[start..start + CELL_BYTES as usize]);

        Ok(Self {
            file,
            offset,
            cells,
            active,
            value,
        })
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value
    }

    #[must_use]
    pub fn cells(&self) -> Cells {
        self.cells
    }

    /// Byte offset of the region within its file.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Stores `value`, returning the previous value.
    ///
    /// The value cell is always forced before the index byte is written.
    /// When `rolling_commit` is `false` the index byte is forced as well;
    /// otherwise the caller is expected to call [`commit`](Self::commit)
    /// once a batch of updates is done.
    pub fn put(&mut self, value: i64, rolling_commit: bool) -> Result<i64> {
        let next = (self.active + 1) % self.cells.count();

        self.write_cell(next, value)?;
        self.file.sync_data()?;

        self.write_index(next)?;
        if !rolling_commit {
            self.file.sync_data()?;
        }

        trace!(
            "keystone@{}: cell {} -> {} (value {} -> {}, rolling={})",
            self.offset,
            self.active,
            next,
            self.value,
            value,
            rolling_commit
        );

        let prev = self.value;
        self.active = next;
        self.value = value;
        Ok(prev)
    }

    /// Adds `delta` to the current value and returns the new value.
    pub fn increment(&mut self, delta: i64, rolling_commit: bool) -> Result<i64> {
        let value = self.value.wrapping_add(delta);
        self.put(value, rolling_commit)?;
        Ok(value)
    }

    /// Forces any rolling-committed index byte to stable storage.
    pub fn commit(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn cell_offset(&self, cell: u8) -> u64 {
        self.offset + cell as u64 * CELL_BYTES
    }

    fn index_offset(&self) -> u64 {
        self.offset + self.cells.count() as u64 * CELL_BYTES
    }

    fn write_cell(&mut self, cell: u8, value: i64) -> io::Result<()> {
        let mut buf = [0u8; CELL_BYTES as usize];
        BigEndian::write_i64(&mut buf, value);
        self.file.seek(SeekFrom::Start(self.cell_offset(cell)))?;
        self.file.write_all(&buf)
    }

    fn write_index(&mut self, cell: u8) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(self.index_offset()))?;
        self.file.write_all(&[cell])
    }
}

#[cfg(test)]
mod tests;
