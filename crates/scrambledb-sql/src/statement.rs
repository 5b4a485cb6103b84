//! Top-level SQL statements

use crate::query::{SelectQuery, TableRef};
use serde::{Deserialize, Serialize};

/// A statement the plan runner can hand to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlStatement {
    /// Plain select
    Query(SelectQuery),

    /// Materialize a select into a new physical table
    CreateTableAsSelect { target: TableRef, query: SelectQuery },

    /// Drop a table
    DropTable { target: TableRef, if_exists: bool },
}

impl SqlStatement {
    pub fn query(query: SelectQuery) -> Self {
        SqlStatement::Query(query)
    }

    pub fn create_table_as_select(target: TableRef, query: SelectQuery) -> Self {
        SqlStatement::CreateTableAsSelect { target, query }
    }

    pub fn drop_table(target: TableRef) -> Self {
        SqlStatement::DropTable {
            target,
            if_exists: true,
        }
    }

    /// Whether executing this statement yields a result set.
    pub fn produces_result(&self) -> bool {
        matches!(self, SqlStatement::Query(_))
    }
}
