//! Row order and tombstone collaborators.
//!
//! Rows are opaque fixed-width byte strings. The engine never assumes a
//! lexical order; every comparison goes through a [`RowOrder`] supplied
//! when the table is created or opened.

use std::cmp::Ordering;
use std::fmt;

/// Total order over two rows of equal width.
///
/// Implementations must be consistent and transitive. Two tables can only
/// be merged or stacked together when their orders report the same
/// [`name`](RowOrder::name).
pub trait RowOrder: Send + Sync + fmt::Debug {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Identifies the order. Orders with equal names must compare rows
    /// identically.
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Unsigned byte-wise order over the whole row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LexicalOrder;

impl RowOrder for LexicalOrder {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Unsigned byte-wise order over a key slice `row[offset..offset + len]`.
///
/// A big-endian unsigned integer key sorts numerically under this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRangeOrder {
    pub offset: usize,
    pub len: usize,
}

impl KeyRangeOrder {
    #[must_use]
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    fn key<'r>(&self, row: &'r [u8]) -> &'r [u8] {
        let end = (self.offset + self.len).min(row.len());
        &row[self.offset.min(end)..end]
    }
}

impl RowOrder for KeyRangeOrder {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.key(a).cmp(self.key(b))
    }

    fn name(&self) -> String {
        format!("KeyRangeOrder[{}..{}]", self.offset, self.offset + self.len)
    }
}

/// Returns `true` if two orders are interchangeable.
#[must_use]
pub fn same_order(a: &dyn RowOrder, b: &dyn RowOrder) -> bool {
    a.name() == b.name()
}

/// Recognizes tombstone rows.
pub trait DeleteCodec: Send + Sync {
    /// A pure function of the row's content.
    fn is_deleted(&self, row: &[u8]) -> bool;
}

/// [`DeleteCodec`] backed by a closure.
pub struct FnDeleteCodec<F>(pub F);

impl<F> DeleteCodec for FnDeleteCodec<F>
where
    F: Fn(&[u8]) -> bool + Send + Sync,
{
    fn is_deleted(&self, row: &[u8]) -> bool {
        (self.0)(row)
    }
}

impl<F> fmt::Debug for FnDeleteCodec<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnDeleteCodec")
    }
}
