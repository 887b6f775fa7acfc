use keystone::KeystoneError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by table operations.
///
/// Callers pattern-match on the variant to tell caller misuse
/// (`InvalidArgument`, `OutOfBounds`) from data problems (`NotSorted`,
/// `Corrupt`) and plain I/O failures. None of them are retried internally.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The row-count keystone could not be read or written.
    #[error("row count keystone: {0}")]
    Keystone(#[from] KeystoneError),

    /// Rows were found (or supplied) out of order. Always fatal.
    #[error("rows not sorted: {0}")]
    NotSorted(String),

    /// A row number past the table's row count.
    #[error("row {row} out of bounds (row count {count})")]
    OutOfBounds { row: u64, count: u64 },

    /// Wrong row width, mismatched row order, bad buffer size and the like.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The file's header or committed length is inconsistent.
    #[error("corrupt table {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
