//! scrambledb exec - the execution plan DAG runtime
//!
//! Turns a logical plan (a graph of SQL-producing steps with data
//! dependencies) into a sequence of physical statements run against a
//! database connection, propagating each step's result as a typed token to
//! its dependents.

pub mod node;
pub mod runner;
pub mod subquery;
pub mod token;

pub use node::{ExecutablePlan, NodeId, NodeKind, PlanNode, QueryDecider, QuerySource};
pub use runner::{AbortHandle, ExecutablePlanRunner};
pub use subquery::{
    convert_subqueries_to_dependent_nodes, create_agg_node, create_ctas_node, create_query_node,
    ExtractedSubqueries,
};
pub use token::{keys, AggMeta, ExecutionInfoToken, TokenValue};
