use std::sync::Arc;

use merge::{Direction, MergeOptions, MergeOutcome};
use table::{DeleteCodec, Result, SortedTable};

use crate::{SetIter, TableSet};

/// A [`TableSet`] whose tombstoned rows read as absent.
///
/// A tombstone still shadows rows below it: a lookup that hits one returns
/// `None` without consulting older tables.
#[derive(Clone)]
pub struct TableSetD {
    set: TableSet,
    codec: Arc<dyn DeleteCodec>,
}

impl std::fmt::Debug for TableSetD {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSetD").field("set", &self.set).finish()
    }
}

impl TableSetD {
    #[must_use]
    pub fn new(set: TableSet, codec: Arc<dyn DeleteCodec>) -> Self {
        Self { set, codec }
    }

    #[must_use]
    pub fn set(&self) -> &TableSet {
        &self.set
    }

    #[must_use]
    pub fn codec(&self) -> &Arc<dyn DeleteCodec> {
        &self.codec
    }

    pub fn append(&self, table: Arc<SortedTable>) -> Result<TableSetD> {
        Ok(Self {
            set: self.set.append(table)?,
            codec: self.codec.clone(),
        })
    }

    pub fn get_row(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .set
            .get_row(key)?
            .filter(|row| !self.codec.is_deleted(row)))
    }

    pub fn iter(&self, direction: Direction) -> Result<SetIter<'_>> {
        self.set.iter_with(None, direction, Some(self.codec.clone()))
    }

    pub fn iter_from(&self, key: &[u8], direction: Direction) -> Result<SetIter<'_>> {
        self.set
            .iter_with(Some(key), direction, Some(self.codec.clone()))
    }

    /// Set-merges every table into `target`, dropping tombstones. The whole
    /// stack takes part, so nothing older can resurface.
    pub fn compact_into(
        &self,
        target: &mut SortedTable,
        options: &MergeOptions,
    ) -> Result<MergeOutcome> {
        let options = options.clone().purge_deleted(self.codec.clone());
        self.set.compact_into(target, &options)
    }
}
