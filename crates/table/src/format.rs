//! Table file header constants and read/write helpers.
//!
//! ## Header (16 bytes) - magic `STB1` (`0x5354_4231`)
//!
//! ```text
//! [magic: u32 BE][row_width: u32 BE][cells: u8][reserved: 3 bytes][crc32: u32 BE]
//! ```
//!
//! The CRC32 covers the first 12 bytes. The header is followed by the
//! keystone region holding the committed row count (`cells * 8 + 1` bytes),
//! and the first row starts right after it.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use keystone::Cells;
use std::io::{self, Read, Result as IoResult, Write};

/// Magic number identifying headered table files (ASCII "STB1").
pub const TABLE_MAGIC: u32 = 0x5354_4231;

/// Size of the fixed header in bytes: 4 (`magic`) + 4 (`row_width`) +
/// 1 (`cells`) + 3 (reserved) + 4 (`crc32`).
pub const HEADER_BYTES: u64 = 4 + 4 + 1 + 3 + 4;

/// Parsed table header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub row_width: u32,
    pub cells: Cells,
}

impl Header {
    /// Byte offset of the row-count keystone.
    #[must_use]
    pub fn keystone_offset(&self) -> u64 {
        HEADER_BYTES
    }

    /// Byte offset of row 0.
    #[must_use]
    pub fn zero_offset(&self) -> u64 {
        HEADER_BYTES + self.cells.region_len()
    }

    fn prefix(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0..4].copy_from_slice(&TABLE_MAGIC.to_be_bytes());
        buf[4..8].copy_from_slice(&self.row_width.to_be_bytes());
        buf[8] = self.cells.count();
        buf
    }

    /// Writes the 16-byte header to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> IoResult<()> {
        let prefix = self.prefix();
        let mut hasher = Crc32::new();
        hasher.update(&prefix);
        w.write_all(&prefix)?;
        w.write_u32::<BigEndian>(hasher.finalize())?;
        Ok(())
    }

    /// Reads and validates a header from `r`.
    ///
    /// Returns `InvalidData` on a bad magic, checksum, cell count or a zero
    /// row width, and `UnexpectedEof` if fewer than 16 bytes are available.
    pub fn read_from<R: Read>(r: &mut R) -> IoResult<Self> {
        let mut prefix = [0u8; 12];
        r.read_exact(&mut prefix)?;
        let stored_crc = r.read_u32::<BigEndian>()?;

        let mut hasher = Crc32::new();
        hasher.update(&prefix);
        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "header CRC32 mismatch: expected {:#010x}, got {:#010x}",
                    stored_crc, actual_crc
                ),
            ));
        }

        let mut fields = &prefix[..];
        let magic = fields.read_u32::<BigEndian>()?;
        if magic != TABLE_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown table magic: {:#x}", magic),
            ));
        }
        let row_width = fields.read_u32::<BigEndian>()?;
        if row_width == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "row width is zero",
            ));
        }
        let cells = Cells::from_count(fields.read_u8()?).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "bad keystone cell count")
        })?;

        Ok(Self { row_width, cells })
    }
}
