//! Subquery-to-dependency normalization
//!
//! Converts nested-query structure into DAG edges: every subquery in a
//! statement becomes its own dependency node materializing into a scratchpad
//! table, and the parent keeps a placeholder resolved at query-creation time
//! from the dependency's token.

use crate::node::{ExecutablePlan, NodeId, NodeKind, QuerySource};
use crate::token::AggMeta;
use scrambledb_common::{IdCreator, Result};
use scrambledb_sql::{PlaceholderId, SelectQuery, TableRef};

/// Dependency nodes produced for one parent query.
#[derive(Debug, Default)]
pub struct ExtractedSubqueries {
    pub dependencies: Vec<NodeId>,
    pub bindings: Vec<(PlaceholderId, NodeId)>,
}

/// Extracts every subquery in `query` into its own dependency node, added to
/// `plan` ahead of the caller's node.
///
/// Subqueries are processed in the query's fixed traversal order (select
/// list, then predicates, then from clauses) so generated node identities
/// and table names are deterministic across runs. Extraction recurses:
/// a subquery nested inside another becomes a dependency of that
/// dependency's node. Running the pass on an already-normalized query is a
/// no-op since no subqueries remain.
pub fn convert_subqueries_to_dependent_nodes(
    plan: &mut ExecutablePlan,
    query: &mut SelectQuery,
    id_creator: &IdCreator,
) -> Result<ExtractedSubqueries> {
    let taken = {
        let mut next = || plan.next_placeholder_id();
        query.take_subqueries(&mut next)
    };

    let mut extracted = ExtractedSubqueries::default();
    for (placeholder, mut subquery) in taken {
        let inner = convert_subqueries_to_dependent_nodes(plan, &mut subquery, id_creator)?;
        let (schema, table) = id_creator.generate_table_name();
        let node = plan.add_node(
            format!("subquery_{}", placeholder.0),
            NodeKind::CreateTableAsSelect {
                target: TableRef::new(schema, table),
                source: QuerySource::Fixed(subquery),
            },
            inner.dependencies,
        )?;
        for (inner_placeholder, dependency) in inner.bindings {
            plan.bind_placeholder(node, inner_placeholder, dependency);
        }
        extracted.dependencies.push(node);
        extracted.bindings.push((placeholder, node));
    }
    Ok(extracted)
}

/// Adds a plain query node after normalizing its subqueries.
pub fn create_query_node(
    plan: &mut ExecutablePlan,
    label: impl Into<String>,
    mut query: SelectQuery,
    id_creator: &IdCreator,
) -> Result<NodeId> {
    let extracted = convert_subqueries_to_dependent_nodes(plan, &mut query, id_creator)?;
    let node = plan.add_node(label, NodeKind::Query { query }, extracted.dependencies)?;
    for (placeholder, dependency) in extracted.bindings {
        plan.bind_placeholder(node, placeholder, dependency);
    }
    Ok(node)
}

/// Adds a create-table-as-select node after normalizing its subqueries.
pub fn create_ctas_node(
    plan: &mut ExecutablePlan,
    label: impl Into<String>,
    target: TableRef,
    mut query: SelectQuery,
    id_creator: &IdCreator,
) -> Result<NodeId> {
    let extracted = convert_subqueries_to_dependent_nodes(plan, &mut query, id_creator)?;
    let node = plan.add_node(
        label,
        NodeKind::CreateTableAsSelect {
            target,
            source: QuerySource::Fixed(query),
        },
        extracted.dependencies,
    )?;
    for (placeholder, dependency) in extracted.bindings {
        plan.bind_placeholder(node, placeholder, dependency);
    }
    Ok(node)
}

/// Adds an aggregation node after normalizing its subqueries.
pub fn create_agg_node(
    plan: &mut ExecutablePlan,
    label: impl Into<String>,
    target: TableRef,
    mut query: SelectQuery,
    agg_meta: AggMeta,
    id_creator: &IdCreator,
) -> Result<NodeId> {
    let extracted = convert_subqueries_to_dependent_nodes(plan, &mut query, id_creator)?;
    let node = plan.add_node(
        label,
        NodeKind::Agg {
            target,
            source: QuerySource::Fixed(query),
            agg_meta,
        },
        extracted.dependencies,
    )?;
    for (placeholder, dependency) in extracted.bindings {
        plan.bind_placeholder(node, placeholder, dependency);
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrambledb_sql::{Expr, Relation};

    fn query_with_predicate_subquery() -> SelectQuery {
        let inner = SelectQuery::count_star(&TableRef::bare("inner_table"));
        SelectQuery::new(
            vec![Expr::Star(None)],
            vec![Relation::table(TableRef::bare("outer_table"))],
        )
        .with_predicate(Expr::col("x").equals(Expr::Subquery(Box::new(inner))))
    }

    #[test]
    fn test_extraction_creates_dependency_node() {
        let mut plan = ExecutablePlan::new();
        let id_creator = IdCreator::new("scratch");
        let node =
            create_ctas_node(
                &mut plan,
                "parent",
                TableRef::new("s", "out"),
                query_with_predicate_subquery(),
                &id_creator,
            )
            .unwrap();

        assert_eq!(plan.len(), 2);
        let parent = plan.node(node);
        assert_eq!(parent.dependencies.len(), 1);
        assert_eq!(parent.placeholder_sources.len(), 1);

        let dependency = plan.node(parent.dependencies[0]);
        match &dependency.kind {
            NodeKind::CreateTableAsSelect { target, .. } => {
                assert_eq!(target.schema.as_deref(), Some("scratch"));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let mut plan = ExecutablePlan::new();
        let id_creator = IdCreator::new("scratch");
        let mut query = query_with_predicate_subquery();

        let first =
            convert_subqueries_to_dependent_nodes(&mut plan, &mut query, &id_creator).unwrap();
        assert_eq!(first.dependencies.len(), 1);
        let nodes_after_first = plan.len();

        let second =
            convert_subqueries_to_dependent_nodes(&mut plan, &mut query, &id_creator).unwrap();
        assert!(second.dependencies.is_empty());
        assert!(second.bindings.is_empty());
        assert_eq!(plan.len(), nodes_after_first);
    }

    #[test]
    fn test_nested_subqueries_become_chained_dependencies() {
        let innermost = SelectQuery::count_star(&TableRef::bare("deep"));
        let middle = SelectQuery::new(
            vec![Expr::Star(None)],
            vec![Relation::table(TableRef::bare("mid"))],
        )
        .with_predicate(Expr::col("y").equals(Expr::Subquery(Box::new(innermost))));
        let outer = SelectQuery::new(
            vec![Expr::Star(None)],
            vec![Relation::derived(middle, "m")],
        );

        let mut plan = ExecutablePlan::new();
        let id_creator = IdCreator::new("scratch");
        let node = create_query_node(&mut plan, "root", outer, &id_creator).unwrap();

        // innermost node, middle node, root
        assert_eq!(plan.len(), 3);
        let root = plan.node(node);
        assert_eq!(root.dependencies.len(), 1);
        let middle_node = plan.node(root.dependencies[0]);
        assert_eq!(middle_node.dependencies.len(), 1);
    }
}
