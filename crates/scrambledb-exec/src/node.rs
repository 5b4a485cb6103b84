//! Executable node graph
//!
//! Nodes live in a per-plan arena and reference each other by index, so a
//! plan can be deep-copied by walking the arena and rewriting edges. Edges
//! point from dependent to dependency, and a node may only depend on nodes
//! added strictly earlier, which makes the graph acyclic by construction
//! rather than by a runtime check.

use crate::token::{keys, AggMeta, ExecutionInfoToken, TokenValue};
use scrambledb_common::{QueryResult, Result, ScrambleDbError};
use scrambledb_sql::{PlaceholderId, SelectQuery, SqlStatement, TableRef};
use std::sync::Arc;

/// Index of a node within its plan's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

/// Where a materializing node's select comes from.
#[derive(Debug, Clone)]
pub enum QuerySource {
    /// Fixed at plan-build time.
    Fixed(SelectQuery),
    /// Carried in a dependency's token under `key`.
    FromToken { dependency: NodeId, key: String },
}

/// In-process step that combines dependency tokens into a select query.
/// Dependency tokens arrive in the node's declared dependency order.
pub trait QueryDecider: Send + Sync {
    fn decide(&self, tokens: &[Arc<ExecutionInfoToken>]) -> Result<SelectQuery>;
}

/// Node kinds. The runner stays oblivious to kind-specific logic; everything
/// kind-specific goes through `create_query` and `create_token`.
#[derive(Clone)]
pub enum NodeKind {
    /// Plain select whose result feeds dependents.
    Query { query: SelectQuery },

    /// Materialize a select into a new physical table.
    CreateTableAsSelect {
        target: TableRef,
        source: QuerySource,
    },

    /// Materializing aggregation; its token additionally carries the
    /// aggregation shape and the executed select.
    Agg {
        target: TableRef,
        source: QuerySource,
        agg_meta: AggMeta,
    },

    /// In-process decision step; executes no SQL.
    Decide { decider: Arc<dyn QueryDecider> },

    /// Cleanup of an intermediate table.
    DropTable { target: TableRef },
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Query { query } => f.debug_struct("Query").field("query", query).finish(),
            NodeKind::CreateTableAsSelect { target, .. } => f
                .debug_struct("CreateTableAsSelect")
                .field("target", target)
                .finish_non_exhaustive(),
            NodeKind::Agg { target, agg_meta, .. } => f
                .debug_struct("Agg")
                .field("target", target)
                .field("agg_meta", agg_meta)
                .finish_non_exhaustive(),
            NodeKind::Decide { .. } => f.debug_struct("Decide").finish_non_exhaustive(),
            NodeKind::DropTable { target } => {
                f.debug_struct("DropTable").field("target", target).finish()
            }
        }
    }
}

/// A node of the executable DAG.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub id: NodeId,
    pub label: String,
    pub kind: NodeKind,
    pub dependencies: Vec<NodeId>,
    /// Placeholder left by subquery extraction -> dependency whose token
    /// resolves it.
    pub placeholder_sources: Vec<(PlaceholderId, NodeId)>,
    /// Set by the runner; a node executes at most once per plan object.
    pub executed: bool,
}

/// Arena-allocated executable DAG.
#[derive(Debug, Clone, Default)]
pub struct ExecutablePlan {
    nodes: Vec<PlanNode>,
    next_placeholder: u32,
}

impl ExecutablePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node depending on `dependencies`, all of which must already be
    /// in the plan.
    pub fn add_node(
        &mut self,
        label: impl Into<String>,
        kind: NodeKind,
        dependencies: Vec<NodeId>,
    ) -> Result<NodeId> {
        let id = NodeId(self.nodes.len() as u32);
        for dependency in &dependencies {
            if dependency.0 >= id.0 {
                return Err(ScrambleDbError::Structural(format!(
                    "dependency {dependency} does not precede {id}"
                )));
            }
        }
        self.nodes.push(PlanNode {
            id,
            label: label.into(),
            kind,
            dependencies,
            placeholder_sources: vec![],
            executed: false,
        });
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PlanNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The root is the last node added; every plan builder finishes with its
    /// terminal step.
    pub fn root(&self) -> Option<NodeId> {
        self.nodes.last().map(|node| node.id)
    }

    pub fn next_placeholder_id(&mut self) -> PlaceholderId {
        let id = PlaceholderId(self.next_placeholder);
        self.next_placeholder += 1;
        id
    }

    /// Records that `placeholder` inside `node` is resolved from
    /// `dependency`'s token.
    pub fn bind_placeholder(
        &mut self,
        node: NodeId,
        placeholder: PlaceholderId,
        dependency: NodeId,
    ) {
        self.node_mut(node)
            .placeholder_sources
            .push((placeholder, dependency));
    }

    /// Direct dependents of `id`.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.dependencies.contains(&id))
            .map(|node| node.id)
            .collect()
    }

    /// Builds the concrete statement for `id` from its dependency tokens
    /// (ordered as the node's dependency list). `None` means the node runs
    /// in-process and sends nothing to the connection.
    pub fn create_query(
        &self,
        id: NodeId,
        tokens: &[Arc<ExecutionInfoToken>],
    ) -> Result<Option<SqlStatement>> {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Query { query } => {
                let query = self.resolve_placeholders(node, query.clone(), tokens)?;
                Ok(Some(SqlStatement::Query(query)))
            }
            NodeKind::CreateTableAsSelect { target, source }
            | NodeKind::Agg { target, source, .. } => {
                let query = self.source_query(node, source, tokens)?;
                let query = self.resolve_placeholders(node, query, tokens)?;
                Ok(Some(SqlStatement::CreateTableAsSelect {
                    target: target.clone(),
                    query,
                }))
            }
            NodeKind::Decide { .. } => Ok(None),
            NodeKind::DropTable { target } => Ok(Some(SqlStatement::drop_table(target.clone()))),
        }
    }

    /// Builds the token `id` publishes after executing. For SQL nodes the
    /// raw result (if any) is attached; decide nodes compute theirs from the
    /// dependency tokens alone.
    pub fn create_token(
        &self,
        id: NodeId,
        tokens: &[Arc<ExecutionInfoToken>],
        result: Option<QueryResult>,
    ) -> Result<ExecutionInfoToken> {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Query { .. } => {
                let mut token = ExecutionInfoToken::new();
                if let Some(result) = result {
                    if let Some(count) = result.single_count() {
                        token = token.with_value(keys::ROW_COUNT, TokenValue::Count(count));
                    }
                    token = token.with_result(result);
                }
                Ok(token)
            }
            NodeKind::CreateTableAsSelect { target, source } => {
                let query = self.source_query(node, source, tokens)?;
                let query = self.resolve_placeholders(node, query, tokens)?;
                Ok(Self::materialized_token(target)
                    .with_value(keys::DEPENDENT_QUERY, TokenValue::Query(query)))
            }
            NodeKind::Agg {
                target,
                source,
                agg_meta,
            } => {
                let query = self.source_query(node, source, tokens)?;
                let query = self.resolve_placeholders(node, query, tokens)?;
                Ok(Self::materialized_token(target)
                    .with_value(keys::DEPENDENT_QUERY, TokenValue::Query(query))
                    .with_value(keys::AGG_META, TokenValue::AggMeta(agg_meta.clone())))
            }
            NodeKind::Decide { decider } => {
                let query = decider.decide(tokens)?;
                Ok(ExecutionInfoToken::new()
                    .with_value(keys::DEPENDENT_QUERY, TokenValue::Query(query)))
            }
            NodeKind::DropTable { target } => Ok(Self::materialized_token(target)),
        }
    }

    fn materialized_token(target: &TableRef) -> ExecutionInfoToken {
        let mut token = ExecutionInfoToken::new()
            .with_value(keys::TABLE_NAME, TokenValue::Text(target.name.clone()));
        if let Some(schema) = &target.schema {
            token = token.with_value(keys::SCHEMA_NAME, TokenValue::Text(schema.clone()));
        }
        token
    }

    fn dependency_token<'a>(
        &self,
        node: &PlanNode,
        dependency: NodeId,
        tokens: &'a [Arc<ExecutionInfoToken>],
    ) -> Result<&'a ExecutionInfoToken> {
        let position = node
            .dependencies
            .iter()
            .position(|d| *d == dependency)
            .ok_or_else(|| {
                ScrambleDbError::Structural(format!(
                    "{} is not a dependency of {}",
                    dependency, node.id
                ))
            })?;
        tokens
            .get(position)
            .map(Arc::as_ref)
            .ok_or_else(|| {
                ScrambleDbError::Internal(format!("missing token for dependency {dependency}"))
            })
    }

    fn source_query(
        &self,
        node: &PlanNode,
        source: &QuerySource,
        tokens: &[Arc<ExecutionInfoToken>],
    ) -> Result<SelectQuery> {
        match source {
            QuerySource::Fixed(query) => Ok(query.clone()),
            QuerySource::FromToken { dependency, key } => {
                let token = self.dependency_token(node, *dependency, tokens)?;
                token.query(key).cloned().ok_or_else(|| {
                    ScrambleDbError::Structural(format!(
                        "token of {dependency} carries no query under key '{key}'"
                    ))
                })
            }
        }
    }

    /// Substitutes the table each placeholder dependency materialized.
    fn resolve_placeholders(
        &self,
        node: &PlanNode,
        mut query: SelectQuery,
        tokens: &[Arc<ExecutionInfoToken>],
    ) -> Result<SelectQuery> {
        for (placeholder, dependency) in &node.placeholder_sources {
            let token = self.dependency_token(node, *dependency, tokens)?;
            let table_name = token.text(keys::TABLE_NAME).ok_or_else(|| {
                ScrambleDbError::Structural(format!(
                    "token of {dependency} carries no table name for {placeholder}"
                ))
            })?;
            let table = match token.text(keys::SCHEMA_NAME) {
                Some(schema) => TableRef::new(schema, table_name),
                None => TableRef::bare(table_name),
            };
            if !query.resolve_placeholder(*placeholder, &table) {
                return Err(ScrambleDbError::Structural(format!(
                    "{placeholder} not found in query of {}",
                    node.id
                )));
            }
        }
        Ok(query)
    }

    /// Deep copy of the subgraph reachable from `root`: structurally
    /// identical dependency edges and statement templates under fresh node
    /// identities, with execution state reset. The original plan is left
    /// untouched, so the copy can run without marking the original executed.
    pub fn deepcopy(&self, root: NodeId) -> ExecutablePlan {
        let mut reachable = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let index = id.0 as usize;
            if reachable[index] {
                continue;
            }
            reachable[index] = true;
            stack.extend(self.nodes[index].dependencies.iter().copied());
        }

        // Dependencies always precede dependents in the arena, so a single
        // pass in id order sees every dependency before the node using it.
        let mut copy = ExecutablePlan::new();
        copy.next_placeholder = self.next_placeholder;
        let mut remap: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        for node in &self.nodes {
            if !reachable[node.id.0 as usize] {
                continue;
            }
            let new_id = NodeId(copy.nodes.len() as u32);
            let dependencies = node
                .dependencies
                .iter()
                .map(|d| remap[d.0 as usize].expect("dependency copied before dependent"))
                .collect();
            let placeholder_sources = node
                .placeholder_sources
                .iter()
                .map(|(p, d)| {
                    (
                        *p,
                        remap[d.0 as usize].expect("dependency copied before dependent"),
                    )
                })
                .collect();
            copy.nodes.push(PlanNode {
                id: new_id,
                label: node.label.clone(),
                kind: node.kind.clone(),
                dependencies,
                placeholder_sources,
                executed: false,
            });
            remap[node.id.0 as usize] = Some(new_id);
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrambledb_sql::Expr;

    fn probe(table: &str) -> NodeKind {
        NodeKind::Query {
            query: SelectQuery::count_star(&TableRef::bare(table)),
        }
    }

    #[test]
    fn test_dependencies_must_precede() {
        let mut plan = ExecutablePlan::new();
        let a = plan.add_node("a", probe("t"), vec![]).unwrap();
        assert!(plan.add_node("b", probe("t"), vec![a]).is_ok());
        assert!(plan.add_node("c", probe("t"), vec![NodeId(9)]).is_err());
    }

    #[test]
    fn test_create_query_resolves_from_token() {
        let mut plan = ExecutablePlan::new();
        let dep = plan
            .add_node(
                "dep",
                NodeKind::CreateTableAsSelect {
                    target: TableRef::new("scratch", "tmp0"),
                    source: QuerySource::Fixed(SelectQuery::count_star(&TableRef::bare("src"))),
                },
                vec![],
            )
            .unwrap();
        let parent = plan
            .add_node(
                "parent",
                NodeKind::CreateTableAsSelect {
                    target: TableRef::new("s", "out"),
                    source: QuerySource::FromToken {
                        dependency: dep,
                        key: keys::DEPENDENT_QUERY.to_string(),
                    },
                },
                vec![dep],
            )
            .unwrap();

        let dep_token = plan.create_token(dep, &[], None).unwrap();
        let statement = plan
            .create_query(parent, &[Arc::new(dep_token)])
            .unwrap()
            .unwrap();
        match statement {
            SqlStatement::CreateTableAsSelect { target, query } => {
                assert_eq!(target, TableRef::new("s", "out"));
                assert_eq!(query.select, vec![Expr::count_star()]);
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn test_deepcopy_is_independent() {
        let mut plan = ExecutablePlan::new();
        let a = plan.add_node("a", probe("t"), vec![]).unwrap();
        let b = plan.add_node("b", probe("t"), vec![a]).unwrap();
        plan.node_mut(a).executed = true;
        plan.node_mut(b).executed = true;

        let copy = plan.deepcopy(b);
        assert_eq!(copy.len(), 2);
        assert!(copy.nodes().iter().all(|node| !node.executed));
        assert_eq!(copy.node(NodeId(1)).dependencies, vec![NodeId(0)]);
        // original untouched
        assert!(plan.node(a).executed);
        assert!(plan.node(b).executed);
    }

    #[test]
    fn test_deepcopy_skips_unreachable() {
        let mut plan = ExecutablePlan::new();
        let a = plan.add_node("a", probe("t"), vec![]).unwrap();
        let _stray = plan.add_node("stray", probe("u"), vec![]).unwrap();
        let b = plan.add_node("b", probe("t"), vec![a]).unwrap();

        let copy = plan.deepcopy(b);
        assert_eq!(copy.len(), 2);
        assert_eq!(copy.root(), Some(NodeId(1)));
    }
}
