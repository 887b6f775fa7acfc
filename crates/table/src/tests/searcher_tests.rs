use super::*;
use anyhow::Result;
use proptest::prelude::*;
use tempfile::tempdir;

// -------------------- SearchResult encoding --------------------

#[test]
fn search_result_encoding() {
    assert_eq!(SearchResult::hit(7).raw(), 7);
    assert_eq!(SearchResult::miss(0).raw(), -1);
    assert_eq!(SearchResult::miss(5).raw(), -6);
    assert_eq!(SearchResult::miss(5).insertion_point(), Some(5));
    assert_eq!(SearchResult::miss(5).found(), None);
    assert_eq!(SearchResult::hit(3).into_result(), Ok(3));
    assert_eq!(SearchResult::from_raw(-4).into_result(), Err(3));
}

// -------------------- Hits & misses --------------------

#[test]
fn search_hits_and_misses() -> Result<()> {
    let dir = tempdir()?;
    let keys: Vec<u64> = (0..1000).map(|k| k * 2).collect();
    let t = table_with(&dir.path().join("t"), &keys)?;
    let mut s = t.searcher(8)?;

    assert_eq!(s.search(&row(0, 0))?.found(), Some(0));
    assert_eq!(s.search(&row(998, 0))?.found(), Some(499));
    assert_eq!(s.hit_row(), row(998, 9980).as_slice());
    assert_eq!(s.search(&row(1998, 0))?.found(), Some(999));

    assert_eq!(s.search(&row(1, 0))?.insertion_point(), Some(1));
    assert_eq!(s.search(&row(999, 0))?.insertion_point(), Some(500));
    assert_eq!(s.search(&row(5000, 0))?.insertion_point(), Some(1000));
    Ok(())
}

#[test]
fn search_empty_table() -> Result<()> {
    let dir = tempdir()?;
    let t = table_with(&dir.path().join("t"), &[])?;
    assert_eq!(t.searcher(4)?.search(&row(1, 0))?.raw(), -1);
    assert_eq!(t.search(&row(1, 0))?, None);
    Ok(())
}

#[test]
fn search_rejects_small_buffer_and_bad_key() -> Result<()> {
    let dir = tempdir()?;
    let t = table_with(&dir.path().join("t"), &[1, 2])?;
    assert!(matches!(t.searcher(3), Err(Error::InvalidArgument(_))));
    let mut s = t.searcher(4)?;
    assert!(matches!(s.search(&[0u8; 3]), Err(Error::InvalidArgument(_))));
    assert!(matches!(
        s.search_range(&row(1, 0), 0, 3),
        Err(Error::OutOfBounds { .. })
    ));
    Ok(())
}

#[test]
fn search_range_respects_bounds() -> Result<()> {
    let dir = tempdir()?;
    let t = table_with(&dir.path().join("t"), &(0..100).collect::<Vec<_>>())?;
    let mut s = t.searcher(4)?;

    assert_eq!(s.search_range(&row(10, 0), 20, 100)?.insertion_point(), Some(20));
    assert_eq!(s.search_range(&row(90, 0), 0, 50)?.insertion_point(), Some(50));
    assert_eq!(s.search_range(&row(30, 0), 20, 50)?.found(), Some(30));
    Ok(())
}

#[test]
fn final_window_is_exposed_as_buffered() -> Result<()> {
    let dir = tempdir()?;
    let t = table_with(&dir.path().join("t"), &(0..64).map(|k| k * 2).collect::<Vec<_>>())?;
    let mut s = t.searcher(4)?;

    let miss = s.search(&row(41, 0))?;
    assert_eq!(miss.insertion_point(), Some(21));
    let window = s.buffered();
    assert!(window.end - window.start <= 4);
    assert!(window.contains(&20) || window.contains(&21));
    for r in window.clone() {
        assert_eq!(s.buffered_row(r), Some(row(r * 2, r * 20).as_slice()));
    }
    assert_eq!(s.buffered_row(window.end + 10), None);
    Ok(())
}

// -------------------- Duplicate runs --------------------

#[test]
fn run_bounds_cover_all_duplicates() -> Result<()> {
    let dir = tempdir()?;
    let mut keys = vec![1, 2];
    keys.extend(std::iter::repeat(5).take(37));
    keys.extend([8, 9]);
    let t = table_with(&dir.path().join("t"), &keys)?;
    let mut s = t.searcher(4)?;

    let key = row(5, 0);
    let hit = s.search(&key)?.found().expect("5 is present");
    assert_eq!(s.run_start(&key, hit, 0)?, 2);
    assert_eq!(s.run_end(&key, hit, t.row_count())?, 39);

    // Limits are honoured.
    assert_eq!(s.run_end(&key, 3, 10)?, 10);
    assert_eq!(s.run_start(&key, 30, 20)?, 20);
    Ok(())
}

#[test]
fn find_first_returns_head_of_run() -> Result<()> {
    let dir = tempdir()?;
    let mut t = SortedTable::create(
        dir.path().join("t"),
        WIDTH,
        key_order(),
        TableOptions::default(),
    )?;
    let mut bytes = row(1, 0);
    for v in 0..20 {
        bytes.extend_from_slice(&row(5, v));
    }
    bytes.extend_from_slice(&row(9, 0));
    t.append(&bytes)?;

    let mut s = t.searcher(4)?;
    assert_eq!(s.find_first(&row(5, 99))?, Some(row(5, 0)));
    assert_eq!(s.find_first(&row(9, 99))?, Some(row(9, 0)));
    assert_eq!(s.find_first(&row(6, 0))?, None);
    Ok(())
}

// -------------------- Properties --------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A hit exactly when some row equals the key; a miss decodes to the
    /// smallest index at which the key could be inserted.
    #[test]
    fn prop_search_matches_in_memory(
        mut keys in prop::collection::vec(0u64..200, 0..300),
        probes in prop::collection::vec(0u64..220, 1..40),
        buffer in 4usize..20,
    ) {
        keys.sort_unstable();
        let dir = tempdir().unwrap();
        let t = table_with(&dir.path().join("t"), &keys).unwrap();
        let mut s = t.searcher(buffer).unwrap();

        for p in probes {
            let res = s.search(&row(p, 0)).unwrap();
            match res.into_result() {
                Ok(i) => prop_assert_eq!(keys[i as usize], p),
                Err(ins) => {
                    prop_assert!(!keys.contains(&p));
                    prop_assert_eq!(ins as usize, keys.partition_point(|&k| k < p));
                }
            }
        }
    }
}
