use super::*;
use crate::{Direction, TableSet};
use anyhow::Result;
use merge::MergeOptions;
use proptest::prelude::*;
use std::collections::BTreeSet;
use tempfile::{tempdir, TempDir};

/// The three-table stack `[1,5,9]`, `[5,7]`, `[9,10]`, tagged by position.
fn example(dir: &TempDir) -> Result<TableSet> {
    Ok(TableSet::new(vec![
        tagged(&dir.path().join("a"), &[1, 5, 9], 0)?,
        tagged(&dir.path().join("b"), &[5, 7], 1)?,
        tagged(&dir.path().join("c"), &[9, 10], 2)?,
    ])?
    .with_search_rows(4))
}

// -------------------- Point lookups --------------------

#[test]
fn get_row_prefers_highest_precedence() -> Result<()> {
    let dir = tempdir()?;
    let set = example(&dir)?;

    assert_eq!(set.get_row(&row(1, 0))?.map(|r| decode(&r)), Some((1, 10)));
    assert_eq!(set.get_row(&row(5, 0))?.map(|r| decode(&r)), Some((5, 51)));
    assert_eq!(set.get_row(&row(9, 0))?.map(|r| decode(&r)), Some((9, 92)));
    assert_eq!(set.get_row(&row(6, 0))?, None);
    assert!(set.get_row(&[1, 2, 3]).is_err());
    Ok(())
}

#[test]
fn empty_set_has_no_rows() -> Result<()> {
    let set = TableSet::empty();
    assert_eq!(set.get_row(&row(1, 0))?, None);
    assert!(set.iter(Direction::Forward)?.next().is_none());
    assert_eq!(set.total_rows(), 0);
    Ok(())
}

// -------------------- Copy-on-write append --------------------

#[test]
fn append_returns_new_set() -> Result<()> {
    let dir = tempdir()?;
    let set = example(&dir)?;
    let newer = tagged(&dir.path().join("d"), &[1], 3)?;

    let grown = set.append(newer)?;
    assert_eq!(set.len(), 3);
    assert_eq!(grown.len(), 4);
    assert_eq!(grown.search_rows(), 4);
    assert_eq!(grown.get_row(&row(1, 0))?.map(|r| decode(&r)), Some((1, 13)));
    assert_eq!(set.get_row(&row(1, 0))?.map(|r| decode(&r)), Some((1, 10)));
    Ok(())
}

#[test]
fn append_rejects_incompatible_table() -> Result<()> {
    let dir = tempdir()?;
    let set = example(&dir)?;
    let narrow = SortedTable::create(
        dir.path().join("n"),
        8,
        key_order(),
        TableOptions::default(),
    )?;
    assert!(matches!(
        set.append(Arc::new(narrow)),
        Err(table::Error::InvalidArgument(_))
    ));
    assert_eq!(set.len(), 3);
    Ok(())
}

// -------------------- Iteration --------------------

#[test]
fn iterates_resolved_rows_both_ways() -> Result<()> {
    let dir = tempdir()?;
    let set = example(&dir)?;
    let expected = vec![(1, 10), (5, 51), (7, 71), (9, 92), (10, 102)];

    assert_eq!(collect(set.iter(Direction::Forward)?)?, expected);
    let mut reversed = expected.clone();
    reversed.reverse();
    assert_eq!(collect(set.iter(Direction::Reverse)?)?, reversed);
    Ok(())
}

#[test]
fn iter_from_positions_on_key() -> Result<()> {
    let dir = tempdir()?;
    let set = example(&dir)?;

    assert_eq!(
        collect(set.iter_from(&row(6, 0), Direction::Forward)?)?,
        vec![(7, 71), (9, 92), (10, 102)]
    );
    assert_eq!(
        collect(set.iter_from(&row(7, 0), Direction::Reverse)?)?,
        vec![(7, 71), (5, 51), (1, 10)]
    );
    assert!(collect(set.iter_from(&row(11, 0), Direction::Forward)?)?.is_empty());
    Ok(())
}

#[test]
fn out_of_order_table_fails_iteration() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("raw");
    std::fs::write(&path, [row(5, 0), row(1, 0)].concat())?;
    let raw = SortedTable::open_raw(&path, 0, WIDTH, key_order(), TableOptions::default())?;
    let set = TableSet::new(vec![Arc::new(raw)])?;

    // Stepping past row 5 lands on row 1, which is caught before 5 is
    // handed out.
    let mut it = set.iter(Direction::Forward)?;
    assert!(matches!(it.next(), Some(Err(table::Error::NotSorted(_)))));
    assert!(it.next().is_none());
    Ok(())
}

#[test]
fn compact_into_matches_iteration() -> Result<()> {
    let dir = tempdir()?;
    let set = example(&dir)?;
    let mut out =
        SortedTable::create(dir.path().join("out"), WIDTH, key_order(), TableOptions::default())?;

    let outcome = set.compact_into(&mut out, &MergeOptions::default())?;
    assert_eq!(outcome.rows(), 5);
    let merged = TableSet::new(vec![Arc::new(out)])?;
    assert_eq!(
        collect(merged.iter(Direction::Forward)?)?,
        collect(set.iter(Direction::Forward)?)?
    );
    Ok(())
}

#[test]
fn duplicate_runs_yield_one_row_per_key() -> Result<()> {
    let dir = tempdir()?;
    let set = TableSet::new(vec![
        table_of(
            &dir.path().join("a"),
            &[(1, 10), (4, 40), (4, 41), (4, 42), (8, 80)],
        )?,
        table_of(&dir.path().join("b"), &[(4, 99), (6, 60), (6, 61)])?,
    ])?
    .with_search_rows(4);

    let expected = vec![(1, 10), (4, 99), (6, 60), (8, 80)];
    assert_eq!(collect(set.iter(Direction::Forward)?)?, expected);
    let mut reverse = collect(set.iter(Direction::Reverse)?)?;
    reverse.reverse();
    assert_eq!(reverse, expected);

    for &(k, v) in &expected {
        assert_eq!(set.get_row(&row(k, 0))?.map(|r| decode(&r)), Some((k, v)));
    }

    let mut out =
        SortedTable::create(dir.path().join("out"), WIDTH, key_order(), TableOptions::default())?;
    set.compact_into(&mut out, &MergeOptions::default())?;
    let merged = TableSet::new(vec![Arc::new(out)])?;
    assert_eq!(collect(merged.iter(Direction::Forward)?)?, expected);
    Ok(())
}

// -------------------- Properties --------------------

fn build(dir: &TempDir, raw: &[BTreeSet<u64>]) -> TableSet {
    let tables = raw
        .iter()
        .enumerate()
        .map(|(i, ks)| {
            let ks: Vec<u64> = ks.iter().copied().collect();
            tagged(&dir.path().join(format!("t{i}")), &ks, i as u64).unwrap()
        })
        .collect();
    TableSet::new(tables).unwrap().with_search_rows(4)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Point lookups agree with the forward iteration, and the reverse
    /// iteration is the forward one backwards.
    #[test]
    fn prop_lookup_matches_iteration(
        raw in prop::collection::vec(prop::collection::btree_set(0u64..40, 0..30), 1..5),
    ) {
        let dir = tempdir().unwrap();
        let set = build(&dir, &raw);

        let forward = collect(set.iter(Direction::Forward).unwrap()).unwrap();
        for k in 0..42u64 {
            let looked_up = set.get_row(&row(k, 0)).unwrap().map(|r| decode(&r));
            let iterated = forward.iter().find(|p| p.0 == k).copied();
            prop_assert_eq!(looked_up, iterated);
        }

        let mut reverse = collect(set.iter(Direction::Reverse).unwrap()).unwrap();
        reverse.reverse();
        prop_assert_eq!(reverse, forward);
    }
}
