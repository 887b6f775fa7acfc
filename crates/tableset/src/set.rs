use log::debug;
use std::sync::Arc;

use merge::{set_merge, Direction, MergeOptions, MergeOutcome, MergeSource};
use table::{DeleteCodec, Result, SortedTable, DEFAULT_SEARCH_ROWS};

use crate::SetIter;

/// Stack of tables, oldest first. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TableSet {
    tables: Vec<Arc<SortedTable>>,
    search_rows: usize,
}

impl Default for TableSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl TableSet {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            tables: Vec::new(),
            search_rows: DEFAULT_SEARCH_ROWS,
        }
    }

    /// Builds a set from `tables`, oldest first. Every table must share the
    /// first table's row width and order.
    pub fn new(tables: Vec<Arc<SortedTable>>) -> Result<Self> {
        if let Some((first, rest)) = tables.split_first() {
            for t in rest {
                first.check_compatible(t)?;
            }
        }
        Ok(Self {
            tables,
            search_rows: DEFAULT_SEARCH_ROWS,
        })
    }

    /// Search buffer, in rows, used by lookups, iterators and compactions.
    #[must_use]
    pub fn with_search_rows(mut self, rows: usize) -> Self {
        self.search_rows = rows;
        self
    }

    #[must_use]
    pub fn search_rows(&self) -> usize {
        self.search_rows
    }

    #[must_use]
    pub fn tables(&self) -> &[Arc<SortedTable>] {
        &self.tables
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Rows across all tables, shadowed ones included.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.row_count()).sum()
    }

    /// Returns a new set with `table` on top. `self` is left untouched.
    pub fn append(&self, table: Arc<SortedTable>) -> Result<TableSet> {
        if let Some(first) = self.tables.first() {
            first.check_compatible(&table)?;
        }
        let mut tables = Vec::with_capacity(self.tables.len() + 1);
        tables.extend(self.tables.iter().cloned());
        tables.push(table);
        debug!("table set grows to {} tables", tables.len());
        Ok(Self {
            tables,
            search_rows: self.search_rows,
        })
    }

    /// Finds the row equal to `key` in the highest-precedence table holding
    /// one. Of several equal rows in that table, the first is returned.
    pub fn get_row(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        for t in self.tables.iter().rev() {
            if let Some(row) = t.searcher(self.search_rows)?.find_first(key)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// Iterates the whole set in `direction`.
    pub fn iter(&self, direction: Direction) -> Result<SetIter<'_>> {
        self.iter_with(None, direction, None)
    }

    /// Iterates from the first row not before `key` in `direction`.
    pub fn iter_from(&self, key: &[u8], direction: Direction) -> Result<SetIter<'_>> {
        self.iter_with(Some(key), direction, None)
    }

    /// Set-merges every table into `target`.
    pub fn compact_into(
        &self,
        target: &mut SortedTable,
        options: &MergeOptions,
    ) -> Result<MergeOutcome> {
        let refs: Vec<&SortedTable> = self.tables.iter().map(Arc::as_ref).collect();
        set_merge(&refs, target, options)
    }

    pub(crate) fn iter_with(
        &self,
        key: Option<&[u8]>,
        direction: Direction,
        codec: Option<Arc<dyn DeleteCodec>>,
    ) -> Result<SetIter<'_>> {
        let Some(first) = self.tables.first() else {
            return Ok(SetIter::empty(direction));
        };
        if let Some(k) = key {
            first.check_row(k)?;
        }
        let mut sources = Vec::with_capacity(self.tables.len());
        for (precedence, t) in self.tables.iter().enumerate() {
            let source = match key {
                Some(k) => MergeSource::at_key(t, k, direction, precedence, self.search_rows)?,
                None => MergeSource::at_start(t, direction, precedence, self.search_rows)?,
            };
            sources.push(source);
        }
        Ok(SetIter::new(first.order().clone(), direction, sources, codec))
    }
}
