//! Size-tiered merge candidate selection.
//!
//! A table's generation is not stored anywhere. It follows from its byte
//! size against a threshold that grows by `fan_out` per generation, so a
//! table moves up a generation on its own once merges make it large enough.

use log::debug;
use table::SortedTable;

/// Identity and size of one table in a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableInfo {
    pub id: u64,
    pub byte_size: u64,
}

impl TableInfo {
    #[must_use]
    pub fn new(id: u64, byte_size: u64) -> Self {
        Self { id, byte_size }
    }

    #[must_use]
    pub fn of(id: u64, table: &SortedTable) -> Self {
        Self::new(id, table.byte_size())
    }
}

/// Generation thresholds and merge triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    /// Largest table that still belongs to generation 0.
    pub gen0_max_bytes: u64,
    /// Growth of the size limit from one generation to the next.
    pub fan_out: u64,
    /// Fewest tables a generation needs to be worth merging.
    pub merge_threshold: usize,
    /// Generations examined before giving up on the rest of the stack.
    pub max_generations: u32,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::from_config(&config::Config::default())
    }
}

impl MergePolicy {
    #[must_use]
    pub fn from_config(config: &config::Config) -> Self {
        Self {
            gen0_max_bytes: config.gen0_max_bytes,
            fan_out: config.fan_out,
            merge_threshold: config.merge_threshold,
            max_generations: config.max_generations,
        }
    }

    #[must_use]
    pub fn gen0_max_bytes(mut self, value: u64) -> Self {
        self.gen0_max_bytes = value;
        self
    }

    #[must_use]
    pub fn fan_out(mut self, value: u64) -> Self {
        self.fan_out = value;
        self
    }

    #[must_use]
    pub fn merge_threshold(mut self, value: usize) -> Self {
        self.merge_threshold = value;
        self
    }

    #[must_use]
    pub fn max_generations(mut self, value: u32) -> Self {
        self.max_generations = value;
        self
    }

    /// `gen0_max_bytes * fan_out^generation`, saturating.
    #[must_use]
    pub fn max_size_for_generation(&self, generation: u32) -> u64 {
        self.fan_out
            .checked_pow(generation)
            .and_then(|f| self.gen0_max_bytes.checked_mul(f))
            .unwrap_or(u64::MAX)
    }
}

/// One proposed merge: `src_infos` are merged together, `back_set_infos`
/// are every older table below them, left as they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationInfo {
    pub generation: u32,
    pub src_infos: Vec<TableInfo>,
    pub back_set_infos: Vec<TableInfo>,
}

impl GenerationInfo {
    /// Position of the first source in the stack.
    #[must_use]
    pub fn start(&self) -> usize {
        self.back_set_infos.len()
    }

    /// Byte size of the merged result, before any shadowed rows drop out.
    #[must_use]
    pub fn src_bytes(&self) -> u64 {
        self.src_infos.iter().map(|t| t.byte_size).sum()
    }

    #[must_use]
    pub fn src_ids(&self) -> Vec<u64> {
        self.src_infos.iter().map(|t| t.id).collect()
    }

    #[must_use]
    pub fn back_set_ids(&self) -> Vec<u64> {
        self.back_set_infos.iter().map(|t| t.id).collect()
    }
}

/// Proposes merges for `stack` (oldest first), youngest generation first.
///
/// Walking from the newest end, generation `g` claims the trailing run of
/// the not-yet-claimed prefix whose tables are no larger than
/// `max_size_for_generation(g)`. A run of at least `merge_threshold` tables
/// becomes a candidate. The result depends only on the inputs.
#[must_use]
pub fn candidate_merges(stack: &[TableInfo], policy: &MergePolicy) -> Vec<GenerationInfo> {
    let mut candidates = Vec::new();
    let mut end = stack.len();
    let mut generation = 0u32;
    let threshold = policy.merge_threshold.max(2);

    while end > 0 && generation < policy.max_generations {
        let limit = policy.max_size_for_generation(generation);
        let start = stack[..end]
            .iter()
            .rposition(|t| t.byte_size > limit)
            .map_or(0, |i| i + 1);

        if end - start >= threshold {
            debug!(
                "generation {}: {} tables below {} bytes at {}..{}",
                generation,
                end - start,
                limit,
                start,
                end
            );
            candidates.push(GenerationInfo {
                generation,
                src_infos: stack[start..end].to_vec(),
                back_set_infos: stack[..start].to_vec(),
            });
        }
        end = start;
        generation += 1;
    }
    candidates
}
