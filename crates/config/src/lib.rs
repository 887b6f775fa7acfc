//! # Config - tablestack settings
//!
//! All settings can be overridden through environment variables:
//!
//! ```text
//! TABLESTACK_DIR              data directory                 (default: "data")
//! TABLESTACK_SEARCH_ROWS      searcher buffer, in rows       (default: 64, min 4)
//! TABLESTACK_GEN0_KB          generation-0 max table KiB     (default: 64)
//! TABLESTACK_FAN_OUT          generation growth factor       (default: 4, min 2)
//! TABLESTACK_MERGE_THRESHOLD  min tables per merge candidate (default: 2, min 2)
//! TABLESTACK_MAX_GENERATIONS  generations examined           (default: 16)
//! TABLESTACK_STRICT_REFS      fail on unbalanced releases    (default: "true")
//! TABLESTACK_SYNC_APPENDS     fsync every table append       (default: "true")
//! ```
//!
//! Unparseable values fall back to the default with a warning; values below
//! a minimum are clamped.

use log::warn;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_SEARCH_ROWS: usize = 64;
pub const MIN_SEARCH_ROWS: usize = 4;
pub const DEFAULT_GEN0_BYTES: u64 = 64 * 1024;
pub const DEFAULT_FAN_OUT: u64 = 4;
pub const DEFAULT_MERGE_THRESHOLD: usize = 2;
pub const DEFAULT_MAX_GENERATIONS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub search_rows: usize,
    /// Largest table, in bytes, that still counts as generation 0.
    pub gen0_max_bytes: u64,
    pub fan_out: u64,
    pub merge_threshold: usize,
    pub max_generations: u32,
    pub strict_refs: bool,
    pub sync_appends: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            search_rows: DEFAULT_SEARCH_ROWS,
            gen0_max_bytes: DEFAULT_GEN0_BYTES,
            fan_out: DEFAULT_FAN_OUT,
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            max_generations: DEFAULT_MAX_GENERATIONS,
            strict_refs: true,
            sync_appends: true,
        }
    }
}

impl Config {
    /// Builds a config from `TABLESTACK_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Used by
    /// [`from_env`](Self::from_env) and by tests.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let gen0_kb: u64 = parse_or(&lookup, "TABLESTACK_GEN0_KB", d.gen0_max_bytes / 1024);

        Self {
            data_dir: lookup("TABLESTACK_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.data_dir),
            search_rows: parse_or(&lookup, "TABLESTACK_SEARCH_ROWS", d.search_rows)
                .max(MIN_SEARCH_ROWS),
            gen0_max_bytes: gen0_kb.saturating_mul(1024).max(1),
            fan_out: parse_or(&lookup, "TABLESTACK_FAN_OUT", d.fan_out).max(2),
            merge_threshold: parse_or(&lookup, "TABLESTACK_MERGE_THRESHOLD", d.merge_threshold)
                .max(2),
            max_generations: parse_or(&lookup, "TABLESTACK_MAX_GENERATIONS", d.max_generations)
                .max(1),
            strict_refs: parse_or(&lookup, "TABLESTACK_STRICT_REFS", d.strict_refs),
            sync_appends: parse_or(&lookup, "TABLESTACK_SYNC_APPENDS", d.sync_appends),
        }
    }
}

/// Reads `key` through `lookup`, falling back to `default` when the key is
/// missing or does not parse.
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{}: cannot parse {:?}, using default", key, raw);
            default
        }),
        None => default,
    }
}
