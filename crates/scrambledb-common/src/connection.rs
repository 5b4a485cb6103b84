//! Database connection abstraction
//!
//! The core never talks to a driver directly; it is handed something that
//! can execute a statement and hand back rows. Backend failures (syntax,
//! permission, timeout) surface unchanged as `Database` errors - nothing
//! here retries.

use crate::{Result, ScrambleDbError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single result cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            _ => None,
        }
    }
}

/// Raw result of one statement: column names plus rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// A result with column metadata but no rows (what a zero-row probe
    /// returns).
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: vec![],
        }
    }

    pub fn single_row(columns: Vec<String>, row: Vec<Value>) -> Self {
        Self {
            columns,
            rows: vec![row],
        }
    }

    /// The first cell of the first row as an integer, for count probes.
    pub fn single_count(&self) -> Option<i64> {
        self.rows.first()?.first()?.as_i64()
    }
}

/// One database session. Implementations must serialize statements per
/// session; the runner never issues two statements concurrently on the same
/// connection.
#[async_trait]
pub trait DbConnection: Send + Sync {
    /// Execute a statement and return its result set.
    async fn execute_query(&self, sql: &str) -> Result<QueryResult>;

    /// Execute a statement for which no result set is expected.
    async fn execute_update(&self, sql: &str) -> Result<()>;
}

/// A set of independent database sessions handed to the plan runner.
///
/// A single connection gives strictly sequential execution; more connections
/// let unrelated plan branches run concurrently, one in-flight statement per
/// session at all times.
#[derive(Clone)]
pub struct ConnectionPool {
    connections: Vec<Arc<dyn DbConnection>>,
}

impl ConnectionPool {
    pub fn single(connection: Arc<dyn DbConnection>) -> Self {
        Self {
            connections: vec![connection],
        }
    }

    pub fn new(connections: Vec<Arc<dyn DbConnection>>) -> Result<Self> {
        if connections.is_empty() {
            return Err(ScrambleDbError::Configuration(
                "connection pool must hold at least one connection".to_string(),
            ));
        }
        Ok(Self { connections })
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, index: usize) -> Arc<dyn DbConnection> {
        self.connections[index % self.connections.len()].clone()
    }
}

/// In-memory connection for tests and dry runs.
///
/// Statements are recorded in execution order. Query results are answered
/// from substring rules registered up front (first matching rule wins);
/// unmatched queries get an empty result. Failures can be injected the same
/// way.
#[derive(Default)]
pub struct ScriptedConnection {
    rules: Mutex<Vec<(String, QueryResult)>>,
    failures: Mutex<Vec<String>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any query containing `pattern` with `result`.
    pub fn respond_with(&self, pattern: impl Into<String>, result: QueryResult) {
        self.rules.lock().push((pattern.into(), result));
    }

    /// Fail any statement containing `pattern`.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.failures.lock().push(pattern.into());
    }

    /// Every statement seen so far, in execution order.
    pub fn executed(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn record_and_check(&self, sql: &str) -> Result<()> {
        self.log.lock().push(sql.to_string());
        tracing::debug!("scripted connection: {sql}");
        for pattern in self.failures.lock().iter() {
            if sql.contains(pattern.as_str()) {
                return Err(ScrambleDbError::Database(format!(
                    "injected failure for statement: {sql}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DbConnection for ScriptedConnection {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        self.record_and_check(sql)?;
        let rules = self.rules.lock();
        for (pattern, result) in rules.iter() {
            if sql.contains(pattern.as_str()) {
                return Ok(result.clone());
            }
        }
        Ok(QueryResult::default())
    }

    async fn execute_update(&self, sql: &str) -> Result<()> {
        self.record_and_check(sql)
    }
}
