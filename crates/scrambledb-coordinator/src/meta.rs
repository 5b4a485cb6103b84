//! Scramble metadata
//!
//! The record handed back after a scramble completes. Downstream query
//! rewriting needs everything here to turn a query over the original table
//! into block-incremental queries over the scrambled one, so the record is
//! serializable for storage in a metadata catalog.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrambleMeta {
    /// Where the scrambled table lives.
    pub schema_name: String,
    pub table_name: String,

    /// The table it was built from.
    pub original_schema_name: String,
    pub original_table_name: String,

    pub block_column: String,
    pub block_count: usize,

    pub tier_column: String,
    pub tier_count: usize,

    /// Per-tier cumulative probability distribution over that tier's blocks,
    /// keyed by tier number.
    pub cumulative_distributions: HashMap<usize, Vec<f64>>,
}
