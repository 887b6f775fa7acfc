//! # CLI - tablestack interactive shell
//!
//! A REPL over a directory of sorted tables. Reads commands from stdin,
//! runs them against the table stack and prints results to stdout. Works
//! interactively and with piped scripts.
//!
//! Rows are a `u64` key and a `u64` value. Tables are built with `NEW`,
//! filled in ascending key order with `PUT`/`DEL` and pushed onto the stack
//! with `COMMIT`; newer tables override older ones.
//!
//! ## Commands
//!
//! ```text
//! NEW                   Open a new table
//! PUT key value         Append a row to the open table (keys ascending)
//! DEL key               Append a tombstone to the open table
//! COMMIT                Push the open table onto the stack
//! GET key               Look up a key across the stack (value or "(nil)")
//! LOOKUP key            Raw search result of the key in every table
//! DUMP table            Print every row of one table
//! STACK                 List committed tables, oldest first
//! SCAN [key] [REV]      Merged iteration, optionally from a key, backwards
//! PLAN                  Show generation merge candidates
//! MERGE LIST|SET [ALL]  Merge the youngest candidate (or the whole stack)
//! COUNTER [delta]       Read or bump the crash-safe counter
//! STATS                 Print configuration and registry state
//! EXIT / QUIT           Leave the shell
//! ```
//!
//! ## Configuration
//!
//! Settings come from `TABLESTACK_*` environment variables; see the
//! `config` crate.
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! tablestack started (dir=data, commit=0, tables=0)
//! > NEW
//! OK table 1
//! > PUT 7 70
//! OK
//! > COMMIT
//! OK commit 1 (table 1)
//! > GET 7
//! 70
//! > EXIT
//! bye
//! ```

mod shell;
mod store;

use anyhow::Result;
use config::Config;
use std::io::{self, BufRead, Write};

use shell::{Flow, Shell};
use store::Store;

fn main() -> Result<()> {
    log_init::init();

    let config = Config::from_env();
    let store = Store::open(config)?;

    println!(
        "tablestack started (dir={}, commit={}, tables={})",
        store.config().data_dir.display(),
        store.commit_id(),
        store.set().set().len()
    );
    println!("Commands: NEW | PUT key value | DEL key | COMMIT | GET key | LOOKUP key");
    println!("          DUMP table | STACK | SCAN [key] [REV] | PLAN | MERGE LIST|SET [ALL]");
    println!("          COUNTER [delta] | STATS | EXIT");

    let mut shell = Shell::new(store);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write!(out, "> ")?;
    out.flush()?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        if shell.execute(&line, &mut out)? == Flow::Exit {
            break;
        }
        write!(out, "> ")?;
        out.flush()?;
    }

    Ok(())
}
