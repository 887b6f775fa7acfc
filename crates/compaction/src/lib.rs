//! # Compaction - choosing and reserving tables to merge
//!
//! - [`candidate_merges`] applies a size-tiered [`MergePolicy`] to a table
//!   stack and proposes [`GenerationInfo`] groups worth merging.
//! - [`TableRegistry`] reference-counts table ids across commits and
//!   in-flight merges, and hands out exclusive [`CheckoutGuard`]s on merge
//!   sources so two merges never consume the same table.

mod error;
mod generation;
mod registry;

pub use error::{RegistryError, Result};
pub use generation::{candidate_merges, GenerationInfo, MergePolicy, TableInfo};
pub use registry::{CheckoutGuard, Commit, TableLifecycle, TableRegistry};
