//! # Merge - multiway merges of sorted tables
//!
//! Two merges share one cursor type ([`MergeSource`]) and one cursor stack
//! ([`SourceStack`]):
//!
//! - [`list_merge`] keeps every row of every source, duplicates included.
//! - [`set_merge`] keeps, for every key, one row: the first row of the
//!   highest-precedence source holding that key. Source `i` outranks
//!   source `j` when `i > j`.
//!
//! Both merges avoid per-row searching: the top cursor searches for the
//! next cursor's row in its own table and the whole block in between is
//! copied
//! to the target in bounded chunks.
//!
//! A merge that fails or is aborted leaves the target unfinished. The caller
//! discards it.

use log::debug;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use table::{DeleteCodec, Result, RowOrder, SortedTable, DEFAULT_SEARCH_ROWS};

mod list;
mod set;
mod source;

pub use list::list_merge;
pub use set::set_merge;
pub use source::{Direction, MergeSource, SourceStack};

/// Upper bound on the bytes moved by one read/append pair while copying.
pub const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// Cancellation flag shared between a running merge and other threads.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the merge to stop at its next step.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tunables for a merge run.
#[derive(Clone)]
pub struct MergeOptions {
    /// Search buffer and read-ahead size of every cursor, in rows.
    pub search_rows: usize,
    pub abort: Option<AbortFlag>,
    /// Drop tombstoned rows from a set merge's output.
    pub purge: Option<Arc<dyn DeleteCodec>>,
}

impl std::fmt::Debug for MergeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeOptions")
            .field("search_rows", &self.search_rows)
            .field("abort", &self.abort)
            .field("purge", &self.purge.is_some())
            .finish()
    }
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            search_rows: DEFAULT_SEARCH_ROWS,
            abort: None,
            purge: None,
        }
    }
}

impl MergeOptions {
    #[must_use]
    pub fn from_config(config: &config::Config) -> Self {
        Self {
            search_rows: config.search_rows,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_abort(mut self, flag: AbortFlag) -> Self {
        self.abort = Some(flag);
        self
    }

    /// Only safe when the merge includes the oldest table: a purged
    /// tombstone would otherwise uncover an older row for its key.
    #[must_use]
    pub fn purge_deleted(mut self, codec: Arc<dyn DeleteCodec>) -> Self {
        self.purge = Some(codec);
        self
    }

    fn aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(AbortFlag::is_requested)
    }
}

/// How a merge ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// All sources consumed and the target flushed.
    Completed { rows: u64 },
    /// Stopped on request after writing `rows`; the target is unfinished.
    Aborted { rows: u64 },
}

impl MergeOutcome {
    #[must_use]
    pub fn rows(self) -> u64 {
        match self {
            MergeOutcome::Completed { rows } | MergeOutcome::Aborted { rows } => rows,
        }
    }

    #[must_use]
    pub fn is_completed(self) -> bool {
        matches!(self, MergeOutcome::Completed { .. })
    }
}

/// Per-row filter a set merge applies while copying.
///
/// Only the first row of each run of equal rows passes, across chunk and
/// block boundaries. With a purge codec, a first row that is deleted is
/// dropped too, and the rest of its run with it.
pub(crate) struct RowFilter<'f> {
    order: &'f dyn RowOrder,
    purge: Option<&'f dyn DeleteCodec>,
    last: Option<Vec<u8>>,
}

impl<'f> RowFilter<'f> {
    pub(crate) fn new(order: &'f dyn RowOrder, purge: Option<&'f dyn DeleteCodec>) -> Self {
        Self {
            order,
            purge,
            last: None,
        }
    }

    fn keep(&mut self, row: &[u8]) -> bool {
        match &mut self.last {
            Some(last) if self.order.compare(last, row) == CmpOrdering::Equal => return false,
            Some(last) => {
                last.clear();
                last.extend_from_slice(row);
            }
            None => self.last = Some(row.to_vec()),
        }
        !self.purge.is_some_and(|c| c.is_deleted(row))
    }
}

/// Copies rows `[from, to)` of `source` to the end of `target`, through
/// `filter` when given. Returns the number of rows written.
pub(crate) fn copy_rows(
    source: &SortedTable,
    from: u64,
    to: u64,
    target: &mut SortedTable,
    mut filter: Option<&mut RowFilter<'_>>,
    buf: &mut Vec<u8>,
) -> Result<u64> {
    let width = source.row_width();
    let chunk = (COPY_CHUNK_BYTES / width).max(1) as u64;
    let mut written = 0;
    let mut kept = Vec::new();
    let mut pos = from;
    while pos < to {
        let n = chunk.min(to - pos);
        source.read_rows(pos, n, buf)?;
        match filter.as_deref_mut() {
            None => {
                target.append(buf)?;
                written += n;
            }
            Some(f) => {
                kept.clear();
                for row in buf.chunks_exact(width).filter(|r| f.keep(r)) {
                    kept.extend_from_slice(row);
                }
                target.append(&kept)?;
                written += (kept.len() / width) as u64;
            }
        }
        pos += n;
    }
    Ok(written)
}

/// Checks every source against the target and logs the merge start.
pub(crate) fn prepare(kind: &str, sources: &[&SortedTable], target: &SortedTable) -> Result<()> {
    for s in sources {
        target.check_compatible(s)?;
    }
    debug!(
        "{} merge of {} tables ({} rows) into {}",
        kind,
        sources.len(),
        sources.iter().map(|s| s.row_count()).sum::<u64>(),
        target.path().display()
    );
    Ok(())
}

/// Flushes the target and logs the merge end.
pub(crate) fn finish(kind: &str, target: &mut SortedTable, rows: u64) -> Result<MergeOutcome> {
    target.flush()?;
    debug!(
        "{} merge into {} finished: {} rows",
        kind,
        target.path().display(),
        rows
    );
    Ok(MergeOutcome::Completed { rows })
}

pub(crate) fn aborted(kind: &str, target: &SortedTable, rows: u64) -> MergeOutcome {
    debug!(
        "{} merge into {} aborted after {} rows",
        kind,
        target.path().display(),
        rows
    );
    MergeOutcome::Aborted { rows }
}

#[cfg(test)]
mod tests;
