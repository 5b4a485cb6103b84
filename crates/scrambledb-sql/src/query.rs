//! Select query objects
//!
//! Deep copy is plain `Clone`: the whole tree has value semantics, so a
//! cloned query shares nothing with the original.

use crate::expr::{Expr, PlaceholderId};
use serde::{Deserialize, Serialize};

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A FROM-clause relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Relation {
    /// Base table with optional alias
    Table {
        table: TableRef,
        alias: Option<String>,
    },

    /// Inline subquery
    DerivedTable { query: Box<SelectQuery>, alias: String },

    /// Stand-in for an extracted FROM-clause subquery
    Placeholder { id: PlaceholderId, alias: String },

    /// Inner join
    Join {
        left: Box<Relation>,
        right: Box<Relation>,
        on: Expr,
    },
}

impl Relation {
    pub fn table(table: TableRef) -> Self {
        Relation::Table { table, alias: None }
    }

    pub fn aliased_table(table: TableRef, alias: impl Into<String>) -> Self {
        Relation::Table {
            table,
            alias: Some(alias.into()),
        }
    }

    pub fn derived(query: SelectQuery, alias: impl Into<String>) -> Self {
        Relation::DerivedTable {
            query: Box::new(query),
            alias: alias.into(),
        }
    }

    pub fn join(left: Relation, right: Relation, on: Expr) -> Self {
        Relation::Join {
            left: Box::new(left),
            right: Box::new(right),
            on,
        }
    }
}

/// Select query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub select: Vec<Expr>,
    pub from: Vec<Relation>,
    pub predicate: Option<Expr>,
    pub group_by: Vec<Expr>,
}

impl SelectQuery {
    pub fn new(select: Vec<Expr>, from: Vec<Relation>) -> Self {
        Self {
            select,
            from,
            predicate: None,
            group_by: vec![],
        }
    }

    /// `select count(*) from <table>`
    pub fn count_star(table: &TableRef) -> Self {
        Self::new(vec![Expr::count_star()], vec![Relation::table(table.clone())])
    }

    /// `select * from <table> where 1 = 0` - returns column metadata and no
    /// rows, used to discover the source column list.
    pub fn zero_row_probe(table: &TableRef) -> Self {
        Self::new(vec![Expr::Star(None)], vec![Relation::table(table.clone())])
            .with_predicate(Expr::int(1).equals(Expr::int(0)))
    }

    /// `select * from <table>`
    pub fn star_from(table: &TableRef) -> Self {
        Self::new(vec![Expr::Star(None)], vec![Relation::table(table.clone())])
    }

    pub fn with_predicate(mut self, predicate: Expr) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_group_by(mut self, group_by: Vec<Expr>) -> Self {
        self.group_by = group_by;
        self
    }

    /// Removes every subquery directly reachable from this query, replacing
    /// each with a placeholder whose id comes from `next_id`.
    ///
    /// Traversal order is fixed - select list, then predicate, then from
    /// clauses - so extraction is deterministic across runs. Subqueries
    /// nested inside an extracted subquery stay inside it; callers that need
    /// full normalization recurse on the returned queries. Running this on a
    /// query without subqueries returns nothing and changes nothing.
    pub fn take_subqueries(
        &mut self,
        next_id: &mut dyn FnMut() -> PlaceholderId,
    ) -> Vec<(PlaceholderId, SelectQuery)> {
        let mut taken = Vec::new();
        for expr in &mut self.select {
            take_in_expr(expr, next_id, &mut taken);
        }
        if let Some(predicate) = &mut self.predicate {
            take_in_expr(predicate, next_id, &mut taken);
        }
        for relation in &mut self.from {
            take_in_relation(relation, next_id, &mut taken);
        }
        taken
    }

    /// Replaces every occurrence of `id` with (a select over) `table`.
    /// Expression placeholders become scalar subqueries reading the
    /// materialized table; relation placeholders become the table itself,
    /// keeping their alias. Returns whether anything was replaced.
    pub fn resolve_placeholder(&mut self, id: PlaceholderId, table: &TableRef) -> bool {
        let mut resolved = false;
        for expr in &mut self.select {
            resolve_in_expr(expr, id, table, &mut resolved);
        }
        if let Some(predicate) = &mut self.predicate {
            resolve_in_expr(predicate, id, table, &mut resolved);
        }
        for relation in &mut self.from {
            resolve_in_relation(relation, id, table, &mut resolved);
        }
        resolved
    }

    /// Whether any placeholder is still unresolved anywhere in the tree.
    pub fn has_placeholders(&self) -> bool {
        self.select.iter().any(expr_has_placeholder)
            || self.predicate.as_ref().map_or(false, expr_has_placeholder)
            || self.from.iter().any(relation_has_placeholder)
    }
}

fn take_in_expr(
    expr: &mut Expr,
    next_id: &mut dyn FnMut() -> PlaceholderId,
    taken: &mut Vec<(PlaceholderId, SelectQuery)>,
) {
    match expr {
        Expr::Subquery(query) => {
            let id = next_id();
            let subquery = std::mem::take(&mut **query);
            *expr = Expr::Placeholder(id);
            taken.push((id, subquery));
        }
        Expr::BinaryOp { left, right, .. } => {
            take_in_expr(left, next_id, taken);
            take_in_expr(right, next_id, taken);
        }
        Expr::Function { args, .. } => {
            for arg in args {
                take_in_expr(arg, next_id, taken);
            }
        }
        Expr::Alias { expr, .. } => take_in_expr(expr, next_id, taken),
        Expr::Case {
            branches,
            else_expr,
        } => {
            for (condition, value) in branches {
                take_in_expr(condition, next_id, taken);
                take_in_expr(value, next_id, taken);
            }
            take_in_expr(else_expr, next_id, taken);
        }
        _ => {}
    }
}

fn take_in_relation(
    relation: &mut Relation,
    next_id: &mut dyn FnMut() -> PlaceholderId,
    taken: &mut Vec<(PlaceholderId, SelectQuery)>,
) {
    match relation {
        Relation::DerivedTable { query, alias } => {
            let id = next_id();
            let subquery = std::mem::take(&mut **query);
            let alias = alias.clone();
            *relation = Relation::Placeholder { id, alias };
            taken.push((id, subquery));
        }
        Relation::Join { left, right, on } => {
            take_in_relation(left, next_id, taken);
            take_in_relation(right, next_id, taken);
            take_in_expr(on, next_id, taken);
        }
        _ => {}
    }
}

fn resolve_in_expr(expr: &mut Expr, id: PlaceholderId, table: &TableRef, resolved: &mut bool) {
    match expr {
        Expr::Placeholder(found) if *found == id => {
            *expr = Expr::Subquery(Box::new(SelectQuery::star_from(table)));
            *resolved = true;
        }
        Expr::BinaryOp { left, right, .. } => {
            resolve_in_expr(left, id, table, resolved);
            resolve_in_expr(right, id, table, resolved);
        }
        Expr::Function { args, .. } => {
            for arg in args {
                resolve_in_expr(arg, id, table, resolved);
            }
        }
        Expr::Alias { expr, .. } => resolve_in_expr(expr, id, table, resolved),
        Expr::Case {
            branches,
            else_expr,
        } => {
            for (condition, value) in branches {
                resolve_in_expr(condition, id, table, resolved);
                resolve_in_expr(value, id, table, resolved);
            }
            resolve_in_expr(else_expr, id, table, resolved);
        }
        Expr::Subquery(query) => {
            if query.resolve_placeholder(id, table) {
                *resolved = true;
            }
        }
        _ => {}
    }
}

fn resolve_in_relation(
    relation: &mut Relation,
    id: PlaceholderId,
    table: &TableRef,
    resolved: &mut bool,
) {
    match relation {
        Relation::Placeholder { id: found, alias } if *found == id => {
            *relation = Relation::Table {
                table: table.clone(),
                alias: Some(alias.clone()),
            };
            *resolved = true;
        }
        Relation::DerivedTable { query, .. } => {
            if query.resolve_placeholder(id, table) {
                *resolved = true;
            }
        }
        Relation::Join { left, right, on } => {
            resolve_in_relation(left, id, table, resolved);
            resolve_in_relation(right, id, table, resolved);
            resolve_in_expr(on, id, table, resolved);
        }
        _ => {}
    }
}

fn expr_has_placeholder(expr: &Expr) -> bool {
    match expr {
        Expr::Placeholder(_) => true,
        Expr::BinaryOp { left, right, .. } => {
            expr_has_placeholder(left) || expr_has_placeholder(right)
        }
        Expr::Function { args, .. } => args.iter().any(expr_has_placeholder),
        Expr::Alias { expr, .. } => expr_has_placeholder(expr),
        Expr::Case {
            branches,
            else_expr,
        } => {
            branches
                .iter()
                .any(|(c, v)| expr_has_placeholder(c) || expr_has_placeholder(v))
                || expr_has_placeholder(else_expr)
        }
        Expr::Subquery(query) => query.has_placeholders(),
        _ => false,
    }
}

fn relation_has_placeholder(relation: &Relation) -> bool {
    match relation {
        Relation::Placeholder { .. } => true,
        Relation::DerivedTable { query, .. } => query.has_placeholders(),
        Relation::Join { left, right, on } => {
            relation_has_placeholder(left)
                || relation_has_placeholder(right)
                || expr_has_placeholder(on)
        }
        _ => false,
    }
}
