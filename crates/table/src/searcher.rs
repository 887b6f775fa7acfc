//! Binary search over a [`SortedTable`].
//!
//! The search narrows an exclusive range `(lo, hi)`, starting from
//! `(-1, row_count)`, by fetching one pivot row at a time. As soon as the
//! remaining candidates fit the search buffer they are fetched with a single
//! sequential read and resolved in memory. A lookup therefore costs a few
//! single-row reads plus one larger read, instead of `log2(n)` tiny ones.
//!
//! Results use the same encoding as Java-style binary searches: a hit is the
//! non-negative row number, a miss is `-(insertion_point) - 1`.

use log::trace;
use std::cmp::Ordering;
use std::ops::Range;

use crate::{Error, Result, SortedTable};

/// Smallest allowed search buffer, in rows.
pub const MIN_SEARCH_ROWS: usize = 4;

/// Search buffer used by [`SortedTable::search`].
pub const DEFAULT_SEARCH_ROWS: usize = 64;

/// Outcome of a search, encoded in a single signed integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchResult(i64);

impl SearchResult {
    #[must_use]
    pub fn hit(row: u64) -> Self {
        Self(row as i64)
    }

    #[must_use]
    pub fn miss(insertion_point: u64) -> Self {
        Self(-(insertion_point as i64) - 1)
    }

    #[must_use]
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn is_hit(self) -> bool {
        self.0 >= 0
    }

    /// The matching row number, if the key was found.
    #[must_use]
    pub fn found(self) -> Option<u64> {
        self.is_hit().then_some(self.0 as u64)
    }

    /// The decoded insertion point, if the key was not found.
    #[must_use]
    pub fn insertion_point(self) -> Option<u64> {
        (!self.is_hit()).then(|| (-(self.0 + 1)) as u64)
    }

    /// `Ok(row)` on a hit, `Err(insertion_point)` on a miss, matching
    /// [`slice::binary_search`].
    pub fn into_result(self) -> std::result::Result<u64, u64> {
        match self.found() {
            Some(row) => Ok(row),
            None => Err((-(self.0 + 1)) as u64),
        }
    }
}

/// Stateful searcher bound to one table.
///
/// Keeps the rows fetched by its last buffered read so callers (merges in
/// particular) can compare against them without going back to the file.
pub struct Searcher<'a> {
    table: &'a SortedTable,
    buffer_rows: usize,
    /// Rows `[buf_first, buf_first + buf_rows)`.
    buf: Vec<u8>,
    buf_first: u64,
    buf_rows: u64,
    pivot: Vec<u8>,
    hit: Vec<u8>,
}

impl<'a> Searcher<'a> {
    pub(crate) fn new(table: &'a SortedTable, buffer_rows: usize) -> Result<Self> {
        if buffer_rows < MIN_SEARCH_ROWS {
            return Err(Error::InvalidArgument(format!(
                "search buffer of {} rows is below the minimum of {}",
                buffer_rows, MIN_SEARCH_ROWS
            )));
        }
        Ok(Self {
            table,
            buffer_rows,
            buf: Vec::with_capacity(buffer_rows * table.row_width()),
            buf_first: 0,
            buf_rows: 0,
            pivot: Vec::with_capacity(table.row_width()),
            hit: Vec::with_capacity(table.row_width()),
        })
    }

    #[must_use]
    pub fn table(&self) -> &'a SortedTable {
        self.table
    }

    #[must_use]
    pub fn buffer_rows(&self) -> usize {
        self.buffer_rows
    }

    /// Searches the whole table for `key`.
    pub fn search(&mut self, key: &[u8]) -> Result<SearchResult> {
        self.search_range(key, 0, self.table.row_count())
    }

    /// Searches rows `[from, to)` for `key`.
    ///
    /// A miss's insertion point lies within `[from, to]`. When several rows
    /// equal `key`, any one of them may be reported; see
    /// [`run_start`](Self::run_start) and [`run_end`](Self::run_end).
    pub fn search_range(&mut self, key: &[u8], from: u64, to: u64) -> Result<SearchResult> {
        self.table.check_row(key)?;
        let count = self.table.row_count();
        if to > count {
            return Err(Error::OutOfBounds { row: to, count });
        }
        if from > to {
            return Err(Error::InvalidArgument(format!(
                "search range {}..{} is reversed",
                from, to
            )));
        }

        let order = self.table.order().clone();
        let mut lo = from as i64 - 1;
        let mut hi = to as i64;

        while (hi - lo - 1) as u64 > self.buffer_rows as u64 {
            let mid = lo + (hi - lo) / 2;
            self.table.read_rows(mid as u64, 1, &mut self.pivot)?;
            match order.compare(&self.pivot, key) {
                Ordering::Less => lo = mid,
                Ordering::Greater => hi = mid,
                Ordering::Equal => {
                    std::mem::swap(&mut self.hit, &mut self.pivot);
                    return Ok(SearchResult::hit(mid as u64));
                }
            }
        }

        let first = (lo + 1) as u64;
        let n = (hi - lo - 1) as u64;
        trace!(
            "search {}: buffering rows {}..{}",
            self.table.path().display(),
            first,
            first + n
        );
        self.fill(first, n)?;

        let w = self.table.row_width();
        let (mut l, mut h) = (0u64, n);
        while l < h {
            let m = l + (h - l) / 2;
            let start = m as usize * w;
            match order.compare(&self.buf[start..start + w], key) {
                Ordering::Less => l = m + 1,
                Ordering::Greater => h = m,
                Ordering::Equal => {
                    self.hit.clear();
                    self.hit.extend_from_slice(&self.buf[start..start + w]);
                    return Ok(SearchResult::hit(first + m));
                }
            }
        }
        Ok(SearchResult::miss(first + l))
    }

    /// Point lookup returning a copy of the matching row.
    pub fn find(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.search(key)?.found().map(|_| self.hit.clone()))
    }

    /// Point lookup returning the first of the rows equal to `key`, the one
    /// a merge keeps for the key.
    pub fn find_first(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(hit) = self.search(key)?.found() else {
            return Ok(None);
        };
        let first = self.run_start(key, hit, 0)?;
        if first == hit {
            return Ok(Some(self.hit.clone()));
        }
        self.table.read_row(first).map(Some)
    }

    /// The row matched by the most recent hit.
    #[must_use]
    pub fn hit_row(&self) -> &[u8] {
        &self.hit
    }

    /// Row numbers currently held in the search buffer.
    #[must_use]
    pub fn buffered(&self) -> Range<u64> {
        self.buf_first..self.buf_first + self.buf_rows
    }

    /// Returns row `row` if it is in the search buffer.
    #[must_use]
    pub fn buffered_row(&self, row: u64) -> Option<&[u8]> {
        if !self.buffered().contains(&row) {
            return None;
        }
        let w = self.table.row_width();
        let start = (row - self.buf_first) as usize * w;
        Some(&self.buf[start..start + w])
    }

    /// Exclusive end of the run of rows equal to `key` that contains `hit`,
    /// looking no further than `to`.
    ///
    /// Checks the buffered window first and falls back to sequential reads
    /// of up to `buffer_rows` rows at a time.
    pub fn run_end(&mut self, key: &[u8], hit: u64, to: u64) -> Result<u64> {
        let order = self.table.order().clone();
        let mut pos = hit + 1;
        while pos < to {
            if !self.buffered().contains(&pos) {
                let n = (self.buffer_rows as u64).min(to - pos);
                self.fill(pos, n)?;
            }
            if order.compare(self.row_in_buffer(pos), key) != Ordering::Equal {
                return Ok(pos);
            }
            pos += 1;
        }
        Ok(to)
    }

    /// First row of the run of rows equal to `key` that contains `hit`,
    /// looking no further back than `from`.
    pub fn run_start(&mut self, key: &[u8], hit: u64, from: u64) -> Result<u64> {
        let order = self.table.order().clone();
        let mut pos = hit;
        while pos > from {
            let prev = pos - 1;
            if !self.buffered().contains(&prev) {
                let n = (self.buffer_rows as u64).min(prev - from + 1);
                self.fill(prev + 1 - n, n)?;
            }
            if order.compare(self.row_in_buffer(prev), key) != Ordering::Equal {
                return Ok(pos);
            }
            pos = prev;
        }
        Ok(from)
    }

    fn fill(&mut self, first: u64, n: u64) -> Result<()> {
        if n > 0 && self.buf_first == first && self.buf_rows == n {
            return Ok(());
        }
        self.table.read_rows(first, n, &mut self.buf)?;
        self.buf_first = first;
        self.buf_rows = n;
        Ok(())
    }

    fn row_in_buffer(&self, row: u64) -> &[u8] {
        let w = self.table.row_width();
        let start = (row - self.buf_first) as usize * w;
        &self.buf[start..start + w]
    }
}
