//! scrambledb sql - query object model and generic SQL rendering
//!
//! Just enough structure for the execution core: building statements,
//! enumerating and extracting subqueries, substituting resolved tables for
//! placeholders, and deep-copying statement trees.

pub mod expr;
pub mod query;
pub mod render;
pub mod statement;

pub use expr::{BinaryOperator, Expr, Literal, PlaceholderId};
pub use query::{Relation, SelectQuery, TableRef};
pub use render::{render_expr, render_select, render_statement};
pub use statement::SqlStatement;
