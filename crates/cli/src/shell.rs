use anyhow::{anyhow, bail, Result};
use std::io::Write;

use crate::store::{decode, encode, MergeKind, Store, TOMBSTONE};
use merge::Direction;
use table::SearchResult;

/// Whether the REPL keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    store: Store,
}

impl Shell {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Runs one command line, writing its output to `out`. Command errors
    /// are printed as `ERR ...`; only failures to write `out` are returned.
    pub fn execute<W: Write>(&mut self, line: &str, out: &mut W) -> Result<Flow> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((cmd, args)) = parts.split_first() else {
            return Ok(Flow::Continue);
        };
        let cmd = cmd.to_uppercase();
        if cmd == "EXIT" || cmd == "QUIT" {
            writeln!(out, "bye")?;
            return Ok(Flow::Exit);
        }
        let mut buf = Vec::new();
        match self.dispatch(&cmd, args, &mut buf) {
            Ok(()) => out.write_all(&buf)?,
            Err(e) => writeln!(out, "ERR {:#}", e)?,
        }
        Ok(Flow::Continue)
    }

    fn dispatch(&mut self, cmd: &str, args: &[&str], out: &mut Vec<u8>) -> Result<()> {
        match cmd {
            "NEW" => {
                let id = self.store.begin()?;
                writeln!(out, "OK table {}", id)?;
            }
            "PUT" => {
                let [k, v] = args else {
                    bail!("usage: PUT key value");
                };
                let value = parse(v)?;
                if value == TOMBSTONE {
                    bail!("value {} is reserved for deletes, use DEL", TOMBSTONE);
                }
                self.store.put(parse(k)?, value)?;
                writeln!(out, "OK")?;
            }
            "DEL" => {
                let [k] = args else {
                    bail!("usage: DEL key");
                };
                self.store.put(parse(k)?, TOMBSTONE)?;
                writeln!(out, "OK")?;
            }
            "COMMIT" => {
                let id = self.store.commit_pending()?;
                writeln!(out, "OK commit {} (table {})", self.store.commit_id(), id)?;
            }
            "GET" => {
                let [k] = args else {
                    bail!("usage: GET key");
                };
                match self.store.get(parse(k)?)? {
                    Some(v) => writeln!(out, "{}", v)?,
                    None => writeln!(out, "(nil)")?,
                }
            }
            "LOOKUP" => self.lookup(args, out)?,
            "DUMP" => self.dump(args, out)?,
            "STACK" => self.stack(out)?,
            "SCAN" => self.scan(args, out)?,
            "MERGE" => self.merge(args, out)?,
            "PLAN" => self.plan(out)?,
            "COUNTER" => {
                let value = match args {
                    [] => self.store.counter(),
                    [d] => self.store.bump_counter(d.parse()?)?,
                    _ => bail!("usage: COUNTER [delta]"),
                };
                writeln!(out, "{}", value)?;
            }
            "STATS" => self.stats(out)?,
            other => bail!("unknown command: {}", other),
        }
        Ok(())
    }

    /// Per-table search results for one key, newest table first.
    fn lookup(&self, args: &[&str], out: &mut Vec<u8>) -> Result<()> {
        let [k] = args else {
            bail!("usage: LOOKUP key");
        };
        let key = encode(parse(k)?, 0);
        let search_rows = self.store.config().search_rows;
        for (id, t) in self.store.tables().collect::<Vec<_>>().into_iter().rev() {
            let mut searcher = t.searcher(search_rows)?;
            let res: SearchResult = searcher.search(&key)?;
            match res.into_result() {
                Ok(row) => {
                    let (_, v) = decode(searcher.hit_row());
                    writeln!(out, "table {}: row {} = {} (raw {})", id, row, show(v), res.raw())?;
                }
                Err(ins) => {
                    writeln!(out, "table {}: miss, insert at {} (raw {})", id, ins, res.raw())?
                }
            }
        }
        Ok(())
    }

    fn dump(&self, args: &[&str], out: &mut Vec<u8>) -> Result<()> {
        let [id] = args else {
            bail!("usage: DUMP table");
        };
        let id: u64 = id.parse()?;
        let t = self
            .store
            .table(id)
            .ok_or_else(|| anyhow!("no committed table {}", id))?;
        let mut buf = Vec::new();
        t.read_rows(0, t.row_count(), &mut buf)?;
        for (i, row) in buf.chunks(t.row_width()).enumerate() {
            let (k, v) = decode(row);
            writeln!(out, "{}: {} -> {}", i, k, show(v))?;
        }
        writeln!(out, "({} rows)", t.row_count())?;
        Ok(())
    }

    fn stack(&self, out: &mut Vec<u8>) -> Result<()> {
        writeln!(out, "commit {}", self.store.commit_id())?;
        for (id, t) in self.store.tables() {
            writeln!(out, "table {}: {} rows, {} bytes", id, t.row_count(), t.byte_size())?;
        }
        if let Some(id) = self.store.pending_id() {
            writeln!(out, "open table {}", id)?;
        }
        Ok(())
    }

    fn scan(&self, args: &[&str], out: &mut Vec<u8>) -> Result<()> {
        let mut start = None;
        let mut direction = Direction::Forward;
        for a in args {
            if a.eq_ignore_ascii_case("REV") {
                direction = Direction::Reverse;
            } else if start.is_none() {
                start = Some(parse(a)?);
            } else {
                bail!("usage: SCAN [key] [REV]");
            }
        }
        let set = self.store.set();
        let iter = match start {
            Some(k) => set.iter_from(&encode(k, 0), direction)?,
            None => set.iter(direction)?,
        };
        let mut n = 0;
        for row in iter {
            let (k, v) = decode(&row?);
            writeln!(out, "{} -> {}", k, v)?;
            n += 1;
        }
        if n == 0 {
            writeln!(out, "(empty)")?;
        } else {
            writeln!(out, "({} entries)", n)?;
        }
        Ok(())
    }

    fn merge(&mut self, args: &[&str], out: &mut Vec<u8>) -> Result<()> {
        let upper: Vec<String> = args.iter().map(|a| a.to_uppercase()).collect();
        let upper: Vec<&str> = upper.iter().map(String::as_str).collect();
        let (kind, all) = match upper.as_slice() {
            ["LIST"] => (MergeKind::List, false),
            ["SET"] => (MergeKind::Set, false),
            ["LIST", "ALL"] => (MergeKind::List, true),
            ["SET", "ALL"] => (MergeKind::Set, true),
            _ => bail!("usage: MERGE LIST|SET [ALL]"),
        };
        match self.store.merge(kind, all)? {
            Some(r) => {
                let generation = r
                    .generation
                    .map_or_else(|| "all".to_string(), |g| format!("generation {}", g));
                writeln!(
                    out,
                    "OK merged {:?} ({}) into table {}: {} rows",
                    r.merged, generation, r.output, r.rows
                )?;
            }
            None => writeln!(out, "nothing to merge")?,
        }
        Ok(())
    }

    fn plan(&self, out: &mut Vec<u8>) -> Result<()> {
        let plan = self.store.plan();
        if plan.is_empty() {
            writeln!(out, "(no candidates)")?;
        }
        for g in plan {
            writeln!(
                out,
                "generation {}: merge {:?} ({} bytes) over back set {:?}",
                g.generation,
                g.src_ids(),
                g.src_bytes(),
                g.back_set_ids()
            )?;
        }
        Ok(())
    }

    fn stats(&self, out: &mut Vec<u8>) -> Result<()> {
        let set = self.store.set().set();
        writeln!(out, "{:?}", self.store.config())?;
        writeln!(
            out,
            "commit={} tables={} rows={} counter={} live_ids={:?}",
            self.store.commit_id(),
            set.len(),
            set.total_rows(),
            self.store.counter(),
            self.store.registry().live_ids()?
        )?;
        Ok(())
    }
}

fn parse(s: &str) -> Result<u64> {
    s.parse()
        .map_err(|e| anyhow!("bad number {:?}: {}", s, e))
}

fn show(v: u64) -> String {
    if v == TOMBSTONE {
        "(deleted)".to_string()
    } else {
        v.to_string()
    }
}
