use super::*;
use anyhow::Result;
use byteorder::{BigEndian, WriteBytesExt};
use std::fs::{self, OpenOptions};
use std::path::Path;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn open_rw(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// Writes `value` straight into `cell` without touching the index byte,
/// leaving the file the way a crash between the two writes would.
fn write_cell_only(path: &Path, offset: u64, cell: u8, value: i64) -> Result<()> {
    let mut f = open_rw(path)?;
    f.seek(SeekFrom::Start(offset + cell as u64 * CELL_BYTES))?;
    f.write_i64::<BigEndian>(value)?;
    f.sync_all()?;
    Ok(())
}

// -------------------- Basic put & get --------------------

#[test]
fn create_then_reopen_reports_initial() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ks");

    let ks = Keystone::create(open_rw(&path)?, 0, 7, Cells::Two)?;
    assert_eq!(ks.get(), 7);
    drop(ks);

    let ks = Keystone::open(open_rw(&path)?, 0, Cells::Two)?;
    assert_eq!(ks.get(), 7);
    assert_eq!(fs::metadata(&path)?.len(), Cells::Two.region_len());
    Ok(())
}

#[test]
fn put_returns_previous_and_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ks");

    let mut ks = Keystone::create(open_rw(&path)?, 0, 0, Cells::Two)?;
    assert_eq!(ks.put(42, false)?, 0);
    assert_eq!(ks.put(43, false)?, 42);
    assert_eq!(ks.put(44, false)?, 43);
    drop(ks);

    let ks = Keystone::open(open_rw(&path)?, 0, Cells::Two)?;
    assert_eq!(ks.get(), 44);
    Ok(())
}

#[test]
fn increment_returns_new_value() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ks");

    let mut ks = Keystone::create(open_rw(&path)?, 0, 10, Cells::Three)?;
    assert_eq!(ks.increment(5, false)?, 15);
    assert_eq!(ks.increment(-20, false)?, -5);
    drop(ks);

    let ks = Keystone::open(open_rw(&path)?, 0, Cells::Three)?;
    assert_eq!(ks.get(), -5);
    Ok(())
}

#[test]
fn rolling_commits_are_visible_after_commit() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ks");

    let mut ks = Keystone::create(open_rw(&path)?, 0, 0, Cells::Three)?;
    for _ in 0..100 {
        ks.increment(1, true)?;
    }
    ks.commit()?;
    drop(ks);

    let ks = Keystone::open(open_rw(&path)?, 0, Cells::Three)?;
    assert_eq!(ks.get(), 100);
    Ok(())
}

#[test]
fn region_at_nonzero_offset_leaves_prefix_alone() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ks");
    fs::write(&path, b"HEADER--")?;

    let mut ks = Keystone::create(open_rw(&path)?, 8, 1, Cells::Two)?;
    ks.put(99, false)?;
    drop(ks);

    let bytes = fs::read(&path)?;
    assert_eq!(&bytes[..8], b"HEADER--");
    let ks = Keystone::open(open_rw(&path)?, 8, Cells::Two)?;
    assert_eq!(ks.get(), 99);
    assert_eq!(ks.offset(), 8);
    Ok(())
}

// -------------------- Crash simulation --------------------

#[test]
fn crash_between_value_and_index_write_keeps_old_value() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ks");

    let ks = Keystone::create(open_rw(&path)?, 0, 0, Cells::Two)?;
    drop(ks);

    // put(42) reached the value cell (next after active 0) but not the index.
    write_cell_only(&path, 0, 1, 42)?;

    let mut ks = Keystone::open(open_rw(&path)?, 0, Cells::Two)?;
    assert_eq!(ks.get(), 0);

    // Completing the update afterwards lands normally.
    ks.put(42, false)?;
    drop(ks);
    let ks = Keystone::open(open_rw(&path)?, 0, Cells::Two)?;
    assert_eq!(ks.get(), 42);
    Ok(())
}

#[test]
fn three_cells_survive_two_unforced_index_writes() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ks");

    let mut ks = Keystone::create(open_rw(&path)?, 0, 5, Cells::Three)?;
    ks.put(6, true)?;
    ks.put(7, true)?;
    drop(ks);

    // Pretend neither rolling index write reached the disk.
    let mut f = open_rw(&path)?;
    f.seek(SeekFrom::Start(3 * CELL_BYTES))?;
    f.write_all(&[0])?;
    drop(f);

    let ks = Keystone::open(open_rw(&path)?, 0, Cells::Three)?;
    assert_eq!(ks.get(), 5, "durable index still names the untouched cell");
    Ok(())
}

// -------------------- Open failures --------------------

#[test]
fn open_truncated_region_fails() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ks");
    fs::write(&path, [0u8; 10])?;

    let err = Keystone::open(open_rw(&path)?, 0, Cells::Two).unwrap_err();
    assert!(matches!(err, KeystoneError::Truncated { needed: 17, len: 10, .. }));
    Ok(())
}

#[test]
fn open_bad_index_fails() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ks");
    let mut bytes = vec![0u8; Cells::Two.region_len() as usize];
    *bytes.last_mut().unwrap() = 5;
    fs::write(&path, &bytes)?;

    let err = Keystone::open(open_rw(&path)?, 0, Cells::Two).unwrap_err();
    assert!(matches!(err, KeystoneError::BadIndex { index: 5, cells: 2 }));
    Ok(())
}

#[test]
fn cells_round_trip_through_count() {
    assert_eq!(Cells::from_count(2), Some(Cells::Two));
    assert_eq!(Cells::from_count(3), Some(Cells::Three));
    assert_eq!(Cells::from_count(4), None);
    assert_eq!(Cells::Three.region_len(), 25);
}
