//! scrambledb - approximate-query-processing middleware core
//!
//! Two subsystems: the scrambling method engine, which partitions a base
//! table into sample blocks and tiers with per-tier cumulative probability
//! distributions, and the execution plan DAG runtime, which runs a graph of
//! SQL-producing steps against a live connection with dependency-ordered
//! token propagation.

pub use scrambledb_common as common;
pub use scrambledb_coordinator as coordinator;
pub use scrambledb_exec as exec;
pub use scrambledb_sql as sql;

pub use scrambledb_common::{ConnectionPool, DbConnection, Result, ScrambleDbError};
pub use scrambledb_coordinator::{ScrambleMeta, ScramblingCoordinator};
