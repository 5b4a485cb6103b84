//! Scrambling plan construction
//!
//! Compiles a scramble request into an executable DAG: probe nodes gather
//! the source statistics, an in-process decision node turns them into the
//! scramble select, and the terminal node materializes the scrambled table.
//! Stratified FastConverge additionally materializes a group-count lookup
//! in the scratchpad schema and drops it once the scramble exists.

use crate::method::{
    rare_group_threshold, DecideContext, GroupStatistics, ScramblingMethod, SourceStatistics,
    GROUP_SIZE_COLUMN,
};
use parking_lot::Mutex;
use scrambledb_common::{IdCreator, Result, ScrambleDbError, ScrambleOptions};
use scrambledb_exec::{
    keys, ExecutablePlan, ExecutionInfoToken, NodeKind, QueryDecider, QuerySource,
};
use scrambledb_sql::{Expr, Relation, SelectQuery, TableRef};
use std::sync::Arc;

/// Builder of scramble plans.
pub struct ScramblingPlan;

impl ScramblingPlan {
    /// Builds the plan scrambling `source` into `target`. The returned
    /// method handle is shared with the plan's decision node; once the plan
    /// has run it carries the block count and the stored per-tier
    /// distributions.
    pub fn create(
        target: &TableRef,
        source: &TableRef,
        method: ScramblingMethod,
        options: &ScrambleOptions,
        id_creator: &IdCreator,
    ) -> Result<(ExecutablePlan, Arc<Mutex<ScramblingMethod>>)> {
        let mut plan = ExecutablePlan::new();

        let row_count_probe = plan.add_node(
            "row_count_probe",
            NodeKind::Query {
                query: SelectQuery::count_star(source),
            },
            vec![],
        )?;
        let column_probe = plan.add_node(
            "column_probe",
            NodeKind::Query {
                query: SelectQuery::zero_row_probe(source),
            },
            vec![],
        )?;

        // Stratified FastConverge needs per-group row counts before it can
        // decide which rows are rare.
        let lookup = match (&method, method.primary_column()) {
            (ScramblingMethod::FastConverge(_), Some(primary)) => {
                let (schema, table) = id_creator.generate_table_name();
                let lookup = TableRef::new(schema, table);
                let threshold = rare_group_threshold(method.block_size());

                let lookup_ctas = plan.add_node(
                    "stratification_lookup",
                    NodeKind::CreateTableAsSelect {
                        target: lookup.clone(),
                        source: QuerySource::Fixed(
                            SelectQuery::new(
                                vec![
                                    Expr::col(primary),
                                    Expr::count_star().aliased(GROUP_SIZE_COLUMN),
                                ],
                                vec![Relation::table(source.clone())],
                            )
                            .with_group_by(vec![Expr::col(primary)]),
                        ),
                    },
                    vec![],
                )?;
                let stats_probe = plan.add_node(
                    "group_statistics_probe",
                    NodeKind::Query {
                        query: SelectQuery::new(
                            vec![
                                Expr::count_star(),
                                Expr::func(
                                    "sum",
                                    vec![Expr::Case {
                                        branches: vec![(
                                            Expr::col(GROUP_SIZE_COLUMN)
                                                .lte(Expr::int(threshold)),
                                            Expr::col(GROUP_SIZE_COLUMN),
                                        )],
                                        else_expr: Box::new(Expr::int(0)),
                                    }],
                                ),
                            ],
                            vec![Relation::table(lookup.clone())],
                        ),
                    },
                    vec![lookup_ctas],
                )?;
                Some((lookup, stats_probe))
            }
            _ => None,
        };

        let method = Arc::new(Mutex::new(method));
        let decider = Arc::new(ScrambleQueryDecider {
            method: Arc::clone(&method),
            source: source.clone(),
            tier_column: options.tier_column_name().to_string(),
            block_column: options.block_column_name().to_string(),
            lookup: lookup.as_ref().map(|(table, _)| table.clone()),
        });
        let mut decision_deps = vec![row_count_probe, column_probe];
        if let Some((_, stats_probe)) = &lookup {
            decision_deps.push(*stats_probe);
        }
        let decision = plan.add_node(
            "scramble_decision",
            NodeKind::Decide { decider },
            decision_deps,
        )?;

        let scramble_ctas = plan.add_node(
            "scramble_ctas",
            NodeKind::CreateTableAsSelect {
                target: target.clone(),
                source: QuerySource::FromToken {
                    dependency: decision,
                    key: keys::DEPENDENT_QUERY.to_string(),
                },
            },
            vec![decision],
        )?;

        if let Some((lookup_table, _)) = lookup {
            plan.add_node(
                "scratchpad_cleanup",
                NodeKind::DropTable {
                    target: lookup_table,
                },
                vec![scramble_ctas],
            )?;
        }

        Ok((plan, method))
    }
}

/// Decision step that folds the probe tokens into the scramble select.
/// Dependency order is row count, column list, then (optionally) the group
/// statistics.
struct ScrambleQueryDecider {
    method: Arc<Mutex<ScramblingMethod>>,
    source: TableRef,
    tier_column: String,
    block_column: String,
    lookup: Option<TableRef>,
}

impl QueryDecider for ScrambleQueryDecider {
    fn decide(&self, tokens: &[Arc<ExecutionInfoToken>]) -> Result<SelectQuery> {
        let row_count = tokens
            .first()
            .and_then(|token| token.count(keys::ROW_COUNT))
            .ok_or_else(|| {
                ScrambleDbError::Structural("row count probe produced no count".to_string())
            })?;
        let columns = tokens
            .get(1)
            .and_then(|token| token.result())
            .map(|result| result.columns.clone())
            .ok_or_else(|| {
                ScrambleDbError::Structural("column probe produced no result".to_string())
            })?;

        let group_stats = match &self.lookup {
            Some(_) => Some(read_group_statistics(tokens.get(2).map(Arc::as_ref))?),
            None => None,
        };

        let ctx = DecideContext {
            source: self.source.clone(),
            stats: SourceStatistics {
                row_count,
                columns,
                group_stats,
            },
            tier_column: self.tier_column.clone(),
            block_column: self.block_column.clone(),
            stratification_lookup: self.lookup.clone(),
        };
        self.method.lock().decide(&ctx)
    }
}

fn read_group_statistics(token: Option<&ExecutionInfoToken>) -> Result<GroupStatistics> {
    let row = token
        .and_then(|token| token.result())
        .and_then(|result| result.rows.first())
        .ok_or_else(|| {
            ScrambleDbError::Structural("group statistics probe produced no row".to_string())
        })?;
    let group_count = row.first().and_then(|value| value.as_i64()).unwrap_or(0);
    let rare_row_count = row.get(1).and_then(|value| value.as_i64()).unwrap_or(0);
    Ok(GroupStatistics {
        group_count,
        rare_row_count,
    })
}
