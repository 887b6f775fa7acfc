mod set_tests;

use std::path::Path;
use std::sync::Arc;
use table::{KeyRangeOrder, Result, RowOrder, SortedTable, TableOptions};

pub const WIDTH: usize = 16;
pub const TOMBSTONE: u64 = u64::MAX;

pub fn key_order() -> Arc<dyn RowOrder> {
    Arc::new(KeyRangeOrder::new(0, 8))
}

pub fn row(key: u64, value: u64) -> Vec<u8> {
    let mut r = key.to_be_bytes().to_vec();
    r.extend_from_slice(&value.to_be_bytes());
    r
}

pub fn decode(row: &[u8]) -> (u64, u64) {
    (
        u64::from_be_bytes(row[..8].try_into().unwrap()),
        u64::from_be_bytes(row[8..16].try_into().unwrap()),
    )
}

pub fn table_of(path: &Path, pairs: &[(u64, u64)]) -> Result<Arc<SortedTable>> {
    let opts = TableOptions {
        sync_appends: false,
    };
    let mut t = SortedTable::create(path, WIDTH, key_order(), opts)?;
    let bytes: Vec<u8> = pairs.iter().flat_map(|&(k, v)| row(k, v)).collect();
    t.append(&bytes)?;
    Ok(Arc::new(t))
}

/// Table holding `keys`, each with value `key * 10 + tag`.
pub fn tagged(path: &Path, keys: &[u64], tag: u64) -> Result<Arc<SortedTable>> {
    let pairs: Vec<(u64, u64)> = keys.iter().map(|&k| (k, k * 10 + tag)).collect();
    table_of(path, &pairs)
}

pub fn collect<I>(iter: I) -> Result<Vec<(u64, u64)>>
where
    I: Iterator<Item = Result<Vec<u8>>>,
{
    iter.map(|r| r.map(|row| decode(&row))).collect()
}
