mod searcher_tests;

use crate::*;
use std::path::Path;
use std::sync::Arc;

/// Rows are a big-endian `u64` key followed by a big-endian `u64` value.
pub const WIDTH: usize = 16;

pub fn key_order() -> Arc<dyn RowOrder> {
    Arc::new(KeyRangeOrder::new(0, 8))
}

pub fn row(key: u64, value: u64) -> Vec<u8> {
    let mut r = Vec::with_capacity(WIDTH);
    r.extend_from_slice(&key.to_be_bytes());
    r.extend_from_slice(&value.to_be_bytes());
    r
}

pub fn key_of(row: &[u8]) -> u64 {
    u64::from_be_bytes(row[..8].try_into().unwrap())
}

pub fn rows(keys: &[u64]) -> Vec<u8> {
    keys.iter().flat_map(|&k| row(k, k * 10)).collect()
}

/// Creates a headered table holding `keys` (values are `key * 10`).
pub fn table_with(path: &Path, keys: &[u64]) -> Result<SortedTable> {
    let mut t = SortedTable::create(path, WIDTH, key_order(), TableOptions::default())?;
    t.append(&rows(keys))?;
    Ok(t)
}
