//! # Table - sorted fixed-width row files
//!
//! The bottom storage layer of tablestack. A [`SortedTable`] is an
//! append-only sequence of fixed-width rows kept in ascending order under a
//! caller-supplied [`RowOrder`]. Tables are write-once in practice: they are
//! filled by a flush or a merge, then only read until a compaction replaces
//! them.
//!
//! ## File layout (headered tables)
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ HEADER (16 bytes)                                              │
//! │ magic "STB1" | row_width (u32) | cells (u8) | 3 reserved | crc │
//! ├───────────────────────────────────────────────────────────────┤
//! │ ROW COUNT KEYSTONE (cells * 8 + 1 bytes)                       │
//! ├───────────────────────────────────────────────────────────────┤  <- zero offset
//! │ ROW 0 | ROW 1 | ... | ROW n-1        (row_width bytes each)    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. Row `i` starts at `zero_offset + i * width`;
//! there is no index section. Raw tables ([`SortedTable::open_raw`]) skip
//! the header and keystone and derive their row count from the file length.
//!
//! ## Lookups
//!
//! [`Searcher`] performs a binary search that switches to a single buffered
//! read once the candidate range is small. Misses are reported as
//! `-(insertion_point) - 1` through [`SearchResult`].

mod error;
pub mod format;
mod order;
mod searcher;
mod table;

pub use error::{Error, Result};
pub use format::{Header, HEADER_BYTES, TABLE_MAGIC};
pub use order::{same_order, DeleteCodec, FnDeleteCodec, KeyRangeOrder, LexicalOrder, RowOrder};
pub use searcher::{SearchResult, Searcher, DEFAULT_SEARCH_ROWS, MIN_SEARCH_ROWS};
pub use table::{SortedTable, TableOptions};

#[cfg(test)]
mod tests;
