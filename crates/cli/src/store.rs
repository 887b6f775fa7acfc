//! A directory of tables plus the commit naming the live stack.
//!
//! ```text
//! <dir>/COMMIT        "<commit id>\n<table id> <table id> ...\n" (oldest first)
//! <dir>/NNNNNN.tbl    one headered table per id
//! <dir>/counter.ks    keystone behind the COUNTER command
//! ```
//!
//! `COMMIT` is replaced with a write-then-rename, so a crash leaves either
//! the old or the new stack. Table files no commit names are deleted on
//! open and whenever the registry releases them.

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use compaction::{candidate_merges, Commit, GenerationInfo, MergePolicy, TableInfo};
use compaction::{TableLifecycle, TableRegistry};
use config::Config;
use keystone::{Cells, Keystone};
use merge::{list_merge, set_merge, MergeOptions, MergeOutcome};
use table::{DeleteCodec, FnDeleteCodec, KeyRangeOrder, RowOrder, SortedTable, TableOptions};
use tableset::{TableSet, TableSetD};

/// Rows are a big-endian `u64` key followed by a big-endian `u64` value.
pub const ROW_WIDTH: usize = 16;

/// Value marking a deleted key.
pub const TOMBSTONE: u64 = u64::MAX;

const COMMIT_FILE: &str = "COMMIT";
const COUNTER_FILE: &str = "counter.ks";

pub fn encode(key: u64, value: u64) -> [u8; ROW_WIDTH] {
    let mut row = [0u8; ROW_WIDTH];
    row[..8].copy_from_slice(&key.to_be_bytes());
    row[8..].copy_from_slice(&value.to_be_bytes());
    row
}

pub fn decode(row: &[u8]) -> (u64, u64) {
    let mut k = [0u8; 8];
    let mut v = [0u8; 8];
    k.copy_from_slice(&row[..8]);
    v.copy_from_slice(&row[8..ROW_WIDTH]);
    (u64::from_be_bytes(k), u64::from_be_bytes(v))
}

pub fn key_order() -> Arc<dyn RowOrder> {
    Arc::new(KeyRangeOrder::new(0, 8))
}

pub fn tombstones() -> Arc<dyn DeleteCodec> {
    Arc::new(FnDeleteCodec(|row: &[u8]| decode(row).1 == TOMBSTONE))
}

pub fn table_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:06}.tbl", id))
}

fn table_id(path: &Path) -> Option<u64> {
    if path.extension()? != "tbl" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Deletes a table's file once nothing references it.
struct FileReaper {
    dir: PathBuf,
}

impl TableLifecycle for FileReaper {
    fn table_released(&self, id: u64) {
        let path = table_path(&self.dir, id);
        match fs::remove_file(&path) {
            Ok(()) => info!("removed {}", path.display()),
            Err(e) => warn!("cannot remove {}: {}", path.display(), e),
        }
    }
}

/// Which merge a compaction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    List,
    Set,
}

/// Result of [`Store::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub generation: Option<u32>,
    pub merged: Vec<u64>,
    pub output: u64,
    pub rows: u64,
}

pub struct Store {
    config: Config,
    dir: PathBuf,
    commit: Commit,
    set: TableSetD,
    registry: TableRegistry,
    pending: Option<(u64, SortedTable)>,
    next_id: u64,
    counter: Keystone,
}

impl Store {
    pub fn open(config: Config) -> Result<Self> {
        let dir = config.data_dir.clone();
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

        let commit = read_commit(&dir)?;
        let options = TableOptions::from_config(&config);

        let mut next_id = commit.table_ids.iter().copied().max().unwrap_or(0) + 1;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(id) = table_id(&path) else { continue };
            next_id = next_id.max(id + 1);
            if !commit.table_ids.contains(&id) {
                info!("removing uncommitted table {}", path.display());
                fs::remove_file(&path)?;
            }
        }

        let mut tables = Vec::with_capacity(commit.table_ids.len());
        for &id in &commit.table_ids {
            let path = table_path(&dir, id);
            let t = SortedTable::open(&path, key_order(), options)
                .with_context(|| format!("opening {}", path.display()))?;
            tables.push(Arc::new(t));
        }
        let set = TableSet::new(tables)?.with_search_rows(config.search_rows);

        let reaper: Arc<dyn TableLifecycle> = Arc::new(FileReaper { dir: dir.clone() });
        let registry = TableRegistry::from_config(&config, Some(reaper));
        registry.advance_commit(&commit)?;

        let counter = open_counter(&dir.join(COUNTER_FILE))?;

        Ok(Self {
            config,
            dir,
            commit,
            set: TableSetD::new(set, tombstones()),
            registry,
            pending: None,
            next_id,
            counter,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn commit_id(&self) -> u64 {
        self.commit.id
    }

    pub fn set(&self) -> &TableSetD {
        &self.set
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// Committed tables, oldest first, with their ids.
    pub fn tables(&self) -> impl Iterator<Item = (u64, &Arc<SortedTable>)> + '_ {
        self.commit
            .table_ids
            .iter()
            .copied()
            .zip(self.set.set().tables())
    }

    pub fn table(&self, id: u64) -> Option<&Arc<SortedTable>> {
        self.tables().find(|(i, _)| *i == id).map(|(_, t)| t)
    }

    pub fn pending_id(&self) -> Option<u64> {
        self.pending.as_ref().map(|(id, _)| *id)
    }

    /// Starts a table that collects `put`s until [`commit_pending`](Self::commit_pending).
    pub fn begin(&mut self) -> Result<u64> {
        if let Some(id) = self.pending_id() {
            bail!("table {} is still open", id);
        }
        let id = self.allocate_id();
        let t = SortedTable::create(
            table_path(&self.dir, id),
            ROW_WIDTH,
            key_order(),
            TableOptions::from_config(&self.config),
        )?;
        self.pending = Some((id, t));
        Ok(id)
    }

    pub fn put(&mut self, key: u64, value: u64) -> Result<()> {
        let (_, t) = self
            .pending
            .as_mut()
            .ok_or_else(|| anyhow!("no open table, use NEW"))?;
        t.append(&encode(key, value))?;
        Ok(())
    }

    /// Pushes the open table on top of the stack as a new commit.
    pub fn commit_pending(&mut self) -> Result<u64> {
        let (id, mut t) = self
            .pending
            .take()
            .ok_or_else(|| anyhow!("no open table, use NEW"))?;
        t.flush()?;
        let set = self.set.append(Arc::new(t))?;
        let mut ids = self.commit.table_ids.clone();
        ids.push(id);
        self.install(ids, set)?;
        Ok(id)
    }

    pub fn get(&self, key: u64) -> Result<Option<u64>> {
        Ok(self
            .set
            .get_row(&encode(key, 0))?
            .map(|row| decode(&row).1))
    }

    pub fn plan(&self) -> Vec<GenerationInfo> {
        candidate_merges(&self.stack_infos(), &MergePolicy::from_config(&self.config))
    }

    /// Merges the youngest candidate generation, or the whole stack when
    /// `all` is set. Returns `None` when there is nothing to merge or the
    /// sources are checked out elsewhere.
    ///
    /// A list merge is refused when two sources hold the same key: the
    /// merged table could not tell the newer row from the shadowed one.
    pub fn merge(&mut self, kind: MergeKind, all: bool) -> Result<Option<MergeReport>> {
        let (generation, start, end) = if all {
            if self.commit.table_ids.len() < 2 {
                return Ok(None);
            }
            (None, 0, self.commit.table_ids.len())
        } else {
            match self.plan().into_iter().next() {
                Some(g) => (Some(g.generation), g.start(), g.start() + g.src_infos.len()),
                None => return Ok(None),
            }
        };

        let ids = self.commit.table_ids.clone();
        let sources: Vec<u64> = ids[start..end].to_vec();
        let back_set: Vec<u64> = ids[..start].to_vec();
        if kind == MergeKind::List {
            // A list merge keeps every row, so a shared key would leave the
            // shadowed value next to the newer one.
            let inputs: Vec<&SortedTable> =
                self.set.set().tables()[start..end].iter().map(Arc::as_ref).collect();
            if let Some(key) = shared_key(&inputs, self.config.search_rows)? {
                bail!(
                    "tables {:?} share key {}, list merge would keep both values; use MERGE SET",
                    sources,
                    key
                );
            }
        }
        let Some(guard) = self.registry.check_out(&sources, &back_set, &self.commit)? else {
            return Ok(None);
        };

        let output = self.allocate_id();
        let out_path = table_path(&self.dir, output);
        let mut target = SortedTable::create(
            &out_path,
            ROW_WIDTH,
            key_order(),
            TableOptions {
                sync_appends: false,
            },
        )?;

        let mut options = MergeOptions::from_config(&self.config);
        if kind == MergeKind::Set && start == 0 {
            options = options.purge_deleted(tombstones());
        }
        let current = self.set.set().tables();
        let inputs: Vec<&SortedTable> = current[start..end].iter().map(Arc::as_ref).collect();
        let outcome = match kind {
            MergeKind::List => list_merge(&inputs, &mut target, &options),
            MergeKind::Set => set_merge(&inputs, &mut target, &options),
        };
        let rows = match outcome {
            Ok(MergeOutcome::Completed { rows }) => rows,
            other => {
                drop(target);
                fs::remove_file(&out_path)?;
                other?;
                bail!("merge into table {} was aborted", output);
            }
        };

        let mut new_tables: Vec<Arc<SortedTable>> = current[..start].to_vec();
        new_tables.push(Arc::new(target));
        new_tables.extend_from_slice(&current[end..]);
        let set = TableSet::new(new_tables)?.with_search_rows(self.config.search_rows);

        let mut new_ids = back_set;
        new_ids.push(output);
        new_ids.extend_from_slice(&ids[end..]);
        self.install(new_ids, TableSetD::new(set, tombstones()))?;
        guard.release()?;

        Ok(Some(MergeReport {
            generation,
            merged: sources,
            output,
            rows,
        }))
    }

    /// Adds `delta` to the persistent counter and returns the new value.
    pub fn bump_counter(&mut self, delta: i64) -> Result<i64> {
        Ok(self.counter.increment(delta, false)?)
    }

    pub fn counter(&self) -> i64 {
        self.counter.get()
    }

    fn stack_infos(&self) -> Vec<TableInfo> {
        self.tables().map(|(id, t)| TableInfo::of(id, t)).collect()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Writes a new commit naming `ids` and makes `set` current.
    fn install(&mut self, ids: Vec<u64>, set: TableSetD) -> Result<()> {
        let commit = Commit::new(self.commit.id + 1, ids);
        write_commit(&self.dir, &commit)?;
        self.registry.advance_commit(&commit)?;
        self.commit = commit;
        self.set = set;
        Ok(())
    }
}

/// Some key present in more than one of `tables`, if there is one.
fn shared_key(tables: &[&SortedTable], search_rows: usize) -> Result<Option<u64>> {
    const SCAN_ROWS: u64 = 4096;
    let mut buf = Vec::new();
    for (i, a) in tables.iter().enumerate() {
        for b in &tables[i + 1..] {
            let (small, large) = if a.row_count() <= b.row_count() {
                (a, b)
            } else {
                (b, a)
            };
            let mut searcher = large.searcher(search_rows)?;
            let mut pos = 0;
            while pos < small.row_count() {
                let n = SCAN_ROWS.min(small.row_count() - pos);
                small.read_rows(pos, n, &mut buf)?;
                for row in buf.chunks_exact(ROW_WIDTH) {
                    if searcher.search(row)?.is_hit() {
                        return Ok(Some(decode(row).0));
                    }
                }
                pos += n;
            }
        }
    }
    Ok(None)
}

fn read_commit(dir: &Path) -> Result<Commit> {
    let path = dir.join(COMMIT_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Commit::new(0, vec![])),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let mut lines = text.lines();
    let id = lines
        .next()
        .ok_or_else(|| anyhow!("{} is empty", path.display()))?
        .trim()
        .parse()
        .with_context(|| format!("bad commit id in {}", path.display()))?;
    let table_ids = lines
        .next()
        .unwrap_or("")
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<Vec<u64>, _>>()
        .with_context(|| format!("bad table id in {}", path.display()))?;
    Ok(Commit::new(id, table_ids))
}

fn write_commit(dir: &Path, commit: &Commit) -> Result<()> {
    let tmp = dir.join(format!("{}.tmp", COMMIT_FILE));
    {
        let mut f = fs::File::create(&tmp)?;
        let ids: Vec<String> = commit.table_ids.iter().map(u64::to_string).collect();
        writeln!(f, "{}", commit.id)?;
        writeln!(f, "{}", ids.join(" "))?;
        f.sync_all()?;
    }
    fs::rename(&tmp, dir.join(COMMIT_FILE))?;
    Ok(())
}

fn open_counter(path: &Path) -> Result<Keystone> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    let keystone = if file.metadata()?.len() == 0 {
        Keystone::create(file, 0, 0, Cells::Two)?
    } else {
        Keystone::open(file, 0, Cells::Two)?
    };
    Ok(keystone)
}
