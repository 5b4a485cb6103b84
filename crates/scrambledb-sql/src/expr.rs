//! SQL expression objects

use crate::query::SelectQuery;
use serde::{Deserialize, Serialize};

/// Identity of a placeholder left behind by subquery extraction. Resolved at
/// query-creation time from the token of the dependency that materialized
/// the extracted subquery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaceholderId(pub u32);

impl std::fmt::Display for PlaceholderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "placeholder_{}", self.0)
    }
}

/// Expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column reference
    Column(String),

    /// Column reference qualified by a relation alias
    QualifiedColumn { table: String, name: String },

    /// `*` or `alias.*`
    Star(Option<String>),

    /// Literal value
    Literal(Literal),

    /// Binary operation
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },

    /// Function call
    Function { name: String, args: Vec<Expr> },

    /// Alias
    Alias { expr: Box<Expr>, name: String },

    /// Searched CASE expression
    Case {
        branches: Vec<(Expr, Expr)>,
        else_expr: Box<Expr>,
    },

    /// Scalar subquery
    Subquery(Box<SelectQuery>),

    /// Stand-in for an extracted subquery
    Placeholder(PlaceholderId),
}

/// Literal value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::QualifiedColumn {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn int(value: i64) -> Self {
        Expr::Literal(Literal::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Expr::Literal(Literal::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(value.into()))
    }

    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn count_star() -> Self {
        Expr::func("count", vec![Expr::Star(None)])
    }

    pub fn aliased(self, name: impl Into<String>) -> Self {
        Expr::Alias {
            expr: Box::new(self),
            name: name.into(),
        }
    }

    pub fn binary(self, op: BinaryOperator, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn equals(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Eq, right)
    }

    pub fn lt(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Lt, right)
    }

    pub fn lte(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Lte, right)
    }
}
