//! Execution info tokens
//!
//! A token is what a node exposes to its dependents after executing, in
//! place of a direct reference to the node's internals. Tokens are built
//! once and never mutated afterwards; dependents that need to adapt one
//! construct a new token.

use scrambledb_common::QueryResult;
use scrambledb_sql::SelectQuery;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known token keys.
pub mod keys {
    /// Schema of a table the node materialized.
    pub const SCHEMA_NAME: &str = "schema_name";
    /// Name of a table the node materialized.
    pub const TABLE_NAME: &str = "table_name";
    /// Row count extracted from a single-count result.
    pub const ROW_COUNT: &str = "row_count";
    /// The select the node executed or decided on, for dependents that embed
    /// it rather than reference a materialized table.
    pub const DEPENDENT_QUERY: &str = "dependent_query";
    /// Aggregation shape metadata from an aggregation node.
    pub const AGG_META: &str = "agg_meta";
}

/// Aggregation shape metadata carried by aggregation nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggMeta {
    pub group_columns: Vec<String>,
    pub measure_columns: Vec<String>,
}

/// A value stored under a token key.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    Count(i64),
    Text(String),
    Query(SelectQuery),
    AggMeta(AggMeta),
}

/// The unit of data passed along a dependency edge.
#[derive(Debug, Clone, Default)]
pub struct ExecutionInfoToken {
    values: HashMap<String, TokenValue>,
    result: Option<QueryResult>,
}

impl ExecutionInfoToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: impl Into<String>, value: TokenValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn with_result(mut self, result: QueryResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn value(&self, key: &str) -> Option<&TokenValue> {
        self.values.get(key)
    }

    pub fn count(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(TokenValue::Count(count)) => Some(*count),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(TokenValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn query(&self, key: &str) -> Option<&SelectQuery> {
        match self.values.get(key) {
            Some(TokenValue::Query(query)) => Some(query),
            _ => None,
        }
    }

    pub fn agg_meta(&self, key: &str) -> Option<&AggMeta> {
        match self.values.get(key) {
            Some(TokenValue::AggMeta(meta)) => Some(meta),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&QueryResult> {
        self.result.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let token = ExecutionInfoToken::new()
            .with_value(keys::ROW_COUNT, TokenValue::Count(7))
            .with_value(keys::TABLE_NAME, TokenValue::Text("t".to_string()));

        assert_eq!(token.count(keys::ROW_COUNT), Some(7));
        assert_eq!(token.text(keys::TABLE_NAME), Some("t"));
        // wrong type reads as absent
        assert_eq!(token.text(keys::ROW_COUNT), None);
        assert_eq!(token.count(keys::SCHEMA_NAME), None);
        assert!(token.result().is_none());
    }
}
