
use std::path::Path;
use std::sync::Arc;
use table::{KeyRangeOrder, Result, RowOrder, SortedTable, TableOptions};

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

pub fn decode(row: &[u8]) -> (u64, u64) {
    (
        u64::from_be_bytes(row[..8].try_into().unwrap()),
        u64::from_be_bytes(row[8..16].try_into().unwrap()),
    )
}

/// Table holding `pairs` in the given order.
pub fn table_of(path: &Path, pairs: &[(u64, u64)]) -> Result<SortedTable> {
    let opts = TableOptions {
        sync_appends: false,
    };
    let mut t = SortedTable::create(path, WIDTH, key_order(), opts)?;
    let bytes: Vec<u8> = pairs.iter().flat_map(|&(k, v)| row(k, v)).collect();
    t.append(&bytes)?;
    Ok(t)
}

/// Table holding `keys`, each with value `key * 10 + tag`.
pub fn tagged(path: &Path, keys: &[u64], tag: u64) -> Result<SortedTable> {
    let pairs: Vec<(u64, u64)> = keys.iter().map(|&k| (k, k * 10 + tag)).collect();
    table_of(path, &pairs)
}

pub fn empty_target(path: &Path) -> Result<SortedTable> {
    table_of(path, &[])
}

pub fn dump(t: &SortedTable) -> Result<Vec<(u64, u64)>> {
    let mut buf = Vec::new();
    t.read_rows(0, t.row_count(), &mut buf)?;
    Ok(buf.chunks(WIDTH).map(decode).collect())
}

pub fn keys(pairs: &[(u64, u64)]) -> Vec<u64> {
    pairs.iter().map(|p| p.0).collect()
}

/// Builds ascending sources from unsorted key lists; values are
/// `source * 1_000_000 + position` so every row is distinguishable.
pub fn numbered_sources(raw: &[Vec<u64>]) -> Vec<Vec<(u64, u64)>> {
    raw.iter()
        .enumerate()
        .map(|(i, ks)| {
            let mut ks = ks.clone();
            ks.sort_unstable();
            ks.into_iter()
                .enumerate()
                .map(|(p, k)| (k, i as u64 * 1_000_000 + p as u64))
                .collect()
        })
        .collect()
}
