//! Dependency-ordered plan execution
//!
//! A node executes only after every dependency's token is available. Ready
//! nodes are dispatched in ascending id order onto idle pool connections,
//! one in-flight statement per connection; with a single connection this
//! degenerates to strict sequential execution. Decide nodes run inline on
//! the scheduler, since they perform no I/O.

use crate::node::{ExecutablePlan, NodeId};
use crate::token::ExecutionInfoToken;
use futures::stream::{FuturesUnordered, StreamExt};
use scrambledb_common::{ConnectionPool, QueryResult, Result, ScrambleDbError};
use scrambledb_sql::render_statement;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Cooperative abort flag for an in-flight run.
///
/// Checked between node executions only; an in-flight statement is never
/// interrupted, and already-materialized intermediate tables are left for
/// the caller to clean up.
#[derive(Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Executes a plan DAG to completion against a connection pool.
pub struct ExecutablePlanRunner;

impl ExecutablePlanRunner {
    /// Runs the DAG to completion and returns the root node's token.
    ///
    /// Exactly one attempt per node: the first statement failure aborts the
    /// run, identifying the failing node, and nothing is retried. A plan
    /// that already ran must be `deepcopy`'d before running again.
    pub async fn run_till_end(
        pool: &ConnectionPool,
        plan: &mut ExecutablePlan,
    ) -> Result<ExecutionInfoToken> {
        Self::run_till_end_with_abort(pool, plan, &AbortHandle::new()).await
    }

    pub async fn run_till_end_with_abort(
        pool: &ConnectionPool,
        plan: &mut ExecutablePlan,
        abort: &AbortHandle,
    ) -> Result<ExecutionInfoToken> {
        let run_id = Uuid::new_v4();
        let root = plan
            .root()
            .ok_or_else(|| ScrambleDbError::Structural("plan has no nodes".to_string()))?;

        let mut remaining: Vec<usize> = plan
            .nodes()
            .iter()
            .map(|node| node.dependencies.len())
            .collect();
        let dependents: Vec<Vec<NodeId>> = plan
            .nodes()
            .iter()
            .map(|node| plan.dependents(node.id))
            .collect();
        let mut tokens: Vec<Option<Arc<ExecutionInfoToken>>> = vec![None; plan.len()];
        let mut ready: BTreeSet<NodeId> = plan
            .nodes()
            .iter()
            .filter(|node| node.dependencies.is_empty())
            .map(|node| node.id)
            .collect();
        let mut idle: Vec<usize> = (0..pool.size()).collect();
        let mut in_flight = FuturesUnordered::new();

        tracing::info!(%run_id, nodes = plan.len(), connections = pool.size(), "starting plan run");

        loop {
            // Dispatch everything ready, as far as idle connections allow.
            let mut waiting_for_connection = Vec::new();
            while let Some(id) = ready.iter().next().copied() {
                ready.remove(&id);

                if abort.is_aborted() {
                    tracing::warn!(%run_id, node = %id, "run aborted");
                    return Err(ScrambleDbError::Aborted { node_id: id.0 });
                }
                if plan.node(id).executed {
                    return Err(ScrambleDbError::Structural(format!(
                        "{id} has already been executed; deepcopy the plan to run it again"
                    )));
                }

                let dep_tokens = collect_dependency_tokens(plan, id, &tokens)?;
                match plan.create_query(id, &dep_tokens)? {
                    None => {
                        // In-process decision step; finishes immediately.
                        let token = plan.create_token(id, &dep_tokens, None)?;
                        finish_node(
                            plan,
                            id,
                            token,
                            &dependents,
                            &mut tokens,
                            &mut remaining,
                            &mut ready,
                        );
                    }
                    Some(statement) => {
                        let Some(connection_index) = idle.pop() else {
                            waiting_for_connection.push(id);
                            continue;
                        };
                        let sql = render_statement(&statement)?;
                        let produces_result = statement.produces_result();
                        let connection = pool.connection(connection_index);
                        tracing::info!(%run_id, node = %id, "executing: {sql}");
                        in_flight.push(async move {
                            let outcome: Result<Option<QueryResult>> = if produces_result {
                                connection.execute_query(&sql).await.map(Some)
                            } else {
                                connection.execute_update(&sql).await.map(|_| None)
                            };
                            (id, connection_index, outcome)
                        });
                    }
                }
            }
            ready.extend(waiting_for_connection);

            if in_flight.is_empty() {
                break;
            }

            // Wait for the next statement to complete.
            if let Some((id, connection_index, outcome)) = in_flight.next().await {
                idle.push(connection_index);
                match outcome {
                    Ok(result) => {
                        let dep_tokens = collect_dependency_tokens(plan, id, &tokens)?;
                        let token = plan.create_token(id, &dep_tokens, result)?;
                        finish_node(
                            plan,
                            id,
                            token,
                            &dependents,
                            &mut tokens,
                            &mut remaining,
                            &mut ready,
                        );
                    }
                    Err(error) => {
                        tracing::warn!(%run_id, node = %id, "node failed: {error}");
                        return Err(ScrambleDbError::NodeExecution {
                            node_id: id.0,
                            message: error.to_string(),
                        });
                    }
                }
            }
        }

        let token = tokens[root.0 as usize].take().ok_or_else(|| {
            ScrambleDbError::Internal(format!("run finished without a token for root {root}"))
        })?;
        tracing::info!(%run_id, "plan run complete");
        Ok(Arc::try_unwrap(token).unwrap_or_else(|token| (*token).clone()))
    }
}

fn collect_dependency_tokens(
    plan: &ExecutablePlan,
    id: NodeId,
    tokens: &[Option<Arc<ExecutionInfoToken>>],
) -> Result<Vec<Arc<ExecutionInfoToken>>> {
    plan.node(id)
        .dependencies
        .iter()
        .map(|dependency| {
            tokens[dependency.0 as usize].clone().ok_or_else(|| {
                ScrambleDbError::Internal(format!(
                    "{id} became ready before its dependency {dependency} produced a token"
                ))
            })
        })
        .collect()
}

fn finish_node(
    plan: &mut ExecutablePlan,
    id: NodeId,
    token: ExecutionInfoToken,
    dependents: &[Vec<NodeId>],
    tokens: &mut [Option<Arc<ExecutionInfoToken>>],
    remaining: &mut [usize],
    ready: &mut BTreeSet<NodeId>,
) {
    plan.node_mut(id).executed = true;
    tokens[id.0 as usize] = Some(Arc::new(token));
    for dependent in &dependents[id.0 as usize] {
        let slot = &mut remaining[dependent.0 as usize];
        *slot -= 1;
        if *slot == 0 {
            ready.insert(*dependent);
        }
    }
}
