use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use merge::{list_merge, set_merge, MergeOptions};
use std::sync::Arc;
use table::{KeyRangeOrder, SortedTable, TableOptions};
use tempfile::{tempdir, TempDir};

const N_ROWS: u64 = 10_000;

fn row(key: u64, value: u64) -> [u8; 16] {
    let mut r = [0u8; 16];
    r[..8].copy_from_slice(&key.to_be_bytes());
    r[8..].copy_from_slice(&value.to_be_bytes());
    r
}

fn create(dir: &TempDir, name: &str) -> SortedTable {
    SortedTable::create(
        dir.path().join(name),
        16,
        Arc::new(KeyRangeOrder::new(0, 8)),
        TableOptions {
            sync_appends: false,
        },
    )
    .unwrap()
}

fn fill(t: &mut SortedTable, keys: impl Iterator<Item = u64>) {
    let mut rows = Vec::new();
    for k in keys {
        rows.extend_from_slice(&row(k, k));
    }
    t.append(&rows).unwrap();
    t.flush().unwrap();
}

/// Two sources, either interleaved key by key or in two disjoint blocks.
fn sources(interleaved: bool) -> (TempDir, SortedTable, SortedTable) {
    let dir = tempdir().unwrap();
    let mut a = create(&dir, "a.tbl");
    let mut b = create(&dir, "b.tbl");
    if interleaved {
        fill(&mut a, (0..N_ROWS).map(|i| i * 2));
        fill(&mut b, (0..N_ROWS).map(|i| i * 2 + 1));
    } else {
        fill(&mut a, 0..N_ROWS);
        fill(&mut b, N_ROWS..N_ROWS * 2);
    }
    (dir, a, b)
}

fn list_merge_benchmark(c: &mut Criterion) {
    for (name, interleaved) in [
        ("list_merge_interleaved_2x10k", true),
        ("list_merge_disjoint_2x10k", false),
    ] {
        let (dir, a, b) = sources(interleaved);
        c.bench_function(name, |bench| {
            bench.iter_batched(
                || create(&dir, "out.tbl"),
                |mut target| {
                    let outcome = list_merge(&[&a, &b], &mut target, &MergeOptions::default());
                    assert_eq!(outcome.unwrap().rows(), N_ROWS * 2);
                },
                BatchSize::SmallInput,
            );
        });
    }
}

fn set_merge_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut a = create(&dir, "a.tbl");
    let mut b = create(&dir, "b.tbl");
    fill(&mut a, 0..N_ROWS);
    fill(&mut b, (0..N_ROWS).step_by(2));

    c.bench_function("set_merge_half_shadowed_10k", |bench| {
        bench.iter_batched(
            || create(&dir, "out.tbl"),
            |mut target| {
                let outcome = set_merge(&[&a, &b], &mut target, &MergeOptions::default());
                assert_eq!(outcome.unwrap().rows(), N_ROWS);
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, list_merge_benchmark, set_merge_benchmark);
criterion_main!(benches);
