//! Merge cursors and the sorted stack that orders them.

use std::cmp::Ordering;
use std::sync::Arc;
use table::{Error, Result, RowOrder, SearchResult, Searcher, SortedTable};

/// Direction a cursor walks its table in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    /// Adjusts a row comparison so that `Less` always means "comes first in
    /// this direction".
    #[must_use]
    pub fn apply(self, ord: Ordering) -> Ordering {
        match self {
            Direction::Forward => ord,
            Direction::Reverse => ord.reverse(),
        }
    }
}

/// A cursor over one table's rows.
///
/// Holds the current row number (or nothing once finished), a snapshot of
/// the table's row count, a read-ahead window of rows in the walking
/// direction, and a [`Searcher`] used to look further ahead. A cursor only
/// ever moves away from where it started and is never re-bound to another
/// table.
pub struct MergeSource<'a> {
    searcher: Searcher<'a>,
    direction: Direction,
    precedence: usize,
    row_count: u64,
    cursor: Option<u64>,
    row: Vec<u8>,
    /// Rows `[ahead_first, ahead_first + ahead_rows)`.
    ahead: Vec<u8>,
    ahead_first: u64,
    ahead_rows: u64,
    read_ahead: u64,
}

impl std::fmt::Debug for MergeSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeSource")
            .field("table", &self.table().path())
            .field("direction", &self.direction)
            .field("precedence", &self.precedence)
            .field("cursor", &self.cursor)
            .field("row_count", &self.row_count)
            .finish()
    }
}

impl<'a> MergeSource<'a> {
    /// Creates a cursor positioned at `start`, or finished if `start` is
    /// `None` or past the last row.
    ///
    /// `buffer_rows` sizes both the searcher buffer and the read-ahead
    /// window.
    pub fn new(
        table: &'a SortedTable,
        start: Option<u64>,
        direction: Direction,
        precedence: usize,
        buffer_rows: usize,
    ) -> Result<Self> {
        let searcher = table.searcher(buffer_rows)?;
        let mut source = Self {
            searcher,
            direction,
            precedence,
            row_count: table.row_count(),
            cursor: None,
            row: Vec::with_capacity(table.row_width()),
            ahead: Vec::new(),
            ahead_first: 0,
            ahead_rows: 0,
            read_ahead: buffer_rows as u64,
        };
        source.seek(start)?;
        Ok(source)
    }

    /// Cursor at the first row in `direction` (row 0 forward, the last row
    /// in reverse).
    pub fn at_start(
        table: &'a SortedTable,
        direction: Direction,
        precedence: usize,
        buffer_rows: usize,
    ) -> Result<Self> {
        let start = match direction {
            Direction::Forward => Some(0),
            Direction::Reverse => table.row_count().checked_sub(1),
        };
        Self::new(table, start, direction, precedence, buffer_rows)
    }

    /// Cursor at the first row not before `key` in `direction`: the first
    /// row `>= key` going forward, the last row `<= key` in reverse.
    pub fn at_key(
        table: &'a SortedTable,
        key: &[u8],
        direction: Direction,
        precedence: usize,
        buffer_rows: usize,
    ) -> Result<Self> {
        let mut source = Self::new(table, None, direction, precedence, buffer_rows)?;
        let count = table.row_count();
        let start = match source.searcher.search(key)?.into_result() {
            Ok(hit) => match direction {
                Direction::Forward => Some(source.searcher.run_start(key, hit, 0)?),
                Direction::Reverse => Some(source.searcher.run_end(key, hit, count)? - 1),
            },
            Err(ins) => match direction {
                Direction::Forward => Some(ins),
                Direction::Reverse => ins.checked_sub(1),
            },
        };
        source.seek(start)?;
        Ok(source)
    }

    #[must_use]
    pub fn table(&self) -> &'a SortedTable {
        self.searcher.table()
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Higher precedence wins ties against lower.
    #[must_use]
    pub fn precedence(&self) -> usize {
        self.precedence
    }

    /// Row count snapshot taken when the cursor was created.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    #[must_use]
    pub fn row_number(&self) -> Option<u64> {
        self.cursor
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cursor.is_none()
    }

    /// The current row, `None` once finished.
    #[must_use]
    pub fn row(&self) -> Option<&[u8]> {
        self.cursor.map(|_| self.row.as_slice())
    }

    /// Compares the current row with `other` under the table's order.
    /// A finished cursor compares greater than any row.
    #[must_use]
    pub fn compare_row(&self, other: &[u8]) -> Ordering {
        match self.row() {
            Some(row) => self.table().order().compare(row, other),
            None => Ordering::Greater,
        }
    }

    /// Steps one row in the walking direction. Returns `false` if the cursor
    /// was already finished.
    pub fn advance(&mut self) -> Result<bool> {
        let Some(cur) = self.cursor else {
            return Ok(false);
        };
        let next = match self.direction {
            Direction::Forward => cur.checked_add(1),
            Direction::Reverse => cur.checked_sub(1),
        };
        self.seek(next)?;
        Ok(true)
    }

    /// Steps one row against the walking direction. Returns `false` if the
    /// cursor is finished or already at its first row.
    pub fn rewind(&mut self) -> Result<bool> {
        let Some(cur) = self.cursor else {
            return Ok(false);
        };
        let prev = match self.direction {
            Direction::Forward => cur.checked_sub(1),
            Direction::Reverse => Some(cur + 1).filter(|r| *r < self.row_count),
        };
        match prev {
            Some(p) => {
                self.seek(Some(p))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Moves to `row`; `None` or a row past the end finishes the cursor.
    pub fn seek(&mut self, row: Option<u64>) -> Result<()> {
        match row.filter(|r| *r < self.row_count) {
            Some(r) => {
                self.load(r)?;
                self.cursor = Some(r);
            }
            None => {
                self.cursor = None;
                self.row.clear();
            }
        }
        Ok(())
    }

    /// Searches for `key` among the rows not yet visited, the current row
    /// included.
    pub fn search_ahead(&mut self, key: &[u8]) -> Result<SearchResult> {
        let cur = self.require_cursor()?;
        match self.direction {
            Direction::Forward => self.searcher.search_range(key, cur, self.row_count),
            Direction::Reverse => self.searcher.search_range(key, 0, cur + 1),
        }
    }

    /// Row just past the run of rows equal to `key` containing `hit`, in the
    /// walking direction. For a reverse cursor this is a row number below
    /// the run, or `None` if the run reaches row 0.
    pub fn run_past(&mut self, key: &[u8], hit: u64) -> Result<Option<u64>> {
        self.require_cursor()?;
        match self.direction {
            Direction::Forward => Ok(Some(self.searcher.run_end(key, hit, self.row_count)?)),
            Direction::Reverse => Ok(self.searcher.run_start(key, hit, 0)?.checked_sub(1)),
        }
    }

    /// First row of the run of rows equal to `key` containing `hit`, not
    /// looking behind the cursor. Forward cursors only.
    pub fn run_first(&mut self, key: &[u8], hit: u64) -> Result<u64> {
        let cur = self.require_cursor()?;
        self.searcher.run_start(key, hit, cur)
    }

    fn require_cursor(&self) -> Result<u64> {
        self.cursor.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "cursor over {} is finished",
                self.table().path().display()
            ))
        })
    }

    fn load(&mut self, r: u64) -> Result<()> {
        if !(self.ahead_first..self.ahead_first + self.ahead_rows).contains(&r) {
            let (first, n) = match self.direction {
                Direction::Forward => (r, self.read_ahead.min(self.row_count - r)),
                Direction::Reverse => {
                    let n = self.read_ahead.min(r + 1);
                    (r + 1 - n, n)
                }
            };
            self.table().read_rows(first, n, &mut self.ahead)?;
            self.ahead_first = first;
            self.ahead_rows = n;
        }
        let w = self.table().row_width();
        let start = (r - self.ahead_first) as usize * w;
        self.row.clear();
        self.row.extend_from_slice(&self.ahead[start..start + w]);
        Ok(())
    }
}

/// Cursors kept ordered so that the one to consume next sits at the end of
/// the vector.
///
/// Order: current row in the walking direction, then higher precedence
/// first. Finished cursors are never kept; pushing one drops it.
pub struct SourceStack<'a> {
    sources: Vec<MergeSource<'a>>,
    order: Arc<dyn RowOrder>,
    direction: Direction,
    retired: usize,
}

impl<'a> SourceStack<'a> {
    #[must_use]
    pub fn new(order: Arc<dyn RowOrder>, direction: Direction) -> Self {
        Self {
            sources: Vec::new(),
            order,
            direction,
            retired: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of cursors dropped because they were finished.
    #[must_use]
    pub fn retired(&self) -> usize {
        self.retired
    }

    /// Inserts `source` at its sorted position.
    pub fn push(&mut self, source: MergeSource<'a>) {
        if source.is_finished() {
            self.retired += 1;
            return;
        }
        // Entries that must be consumed after `source` stay in front of it.
        let pos = self
            .sources
            .partition_point(|s| self.consume_order(s, &source) == Ordering::Greater);
        self.sources.insert(pos, source);
    }

    /// Removes the cursor to consume next.
    pub fn pop(&mut self) -> Option<MergeSource<'a>> {
        self.sources.pop()
    }

    /// The cursor to consume next.
    #[must_use]
    pub fn peek(&self) -> Option<&MergeSource<'a>> {
        self.sources.last()
    }

    /// `Less` if `a` must be consumed before `b`.
    #[must_use]
    pub fn consume_order(&self, a: &MergeSource<'_>, b: &MergeSource<'_>) -> Ordering {
        match (a.row(), b.row()) {
            (Some(x), Some(y)) => self
                .direction
                .apply(self.order.compare(x, y))
                .then_with(|| b.precedence().cmp(&a.precedence())),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => b.precedence().cmp(&a.precedence()),
        }
    }
}
