//! Plan runner behavior against a scripted connection

use scrambledb_common::{
    ConnectionPool, DbConnection, IdCreator, QueryResult, ScrambleDbError, ScriptedConnection,
    Value,
};
use scrambledb_exec::{
    create_agg_node, keys, AbortHandle, AggMeta, ExecutablePlan, ExecutablePlanRunner,
    ExecutionInfoToken, NodeKind, QueryDecider, QuerySource,
};
use scrambledb_sql::{BinaryOperator, Expr, Relation, SelectQuery, TableRef};
use std::sync::Arc;

fn scripted_pool() -> (Arc<ScriptedConnection>, ConnectionPool) {
    let conn = Arc::new(ScriptedConnection::new());
    let pool = ConnectionPool::single(conn.clone());
    (conn, pool)
}

fn count_result(count: i64) -> QueryResult {
    QueryResult::single_row(vec!["c".to_string()], vec![Value::Int(count)])
}

fn ctas(target: &TableRef, source: &TableRef) -> NodeKind {
    NodeKind::CreateTableAsSelect {
        target: target.clone(),
        source: QuerySource::Fixed(SelectQuery::star_from(source)),
    }
}

#[tokio::test]
async fn test_sequential_chain_executes_in_dependency_order() {
    let (conn, pool) = scripted_pool();
    conn.respond_with("count(*)", count_result(5));

    let mut plan = ExecutablePlan::new();
    let probe = plan
        .add_node(
            "probe",
            NodeKind::Query {
                query: SelectQuery::count_star(&TableRef::new("s", "src")),
            },
            vec![],
        )
        .unwrap();
    let materialize = plan
        .add_node(
            "materialize",
            ctas(&TableRef::new("s", "mid"), &TableRef::new("s", "src")),
            vec![probe],
        )
        .unwrap();
    plan.add_node(
        "cleanup",
        NodeKind::DropTable {
            target: TableRef::new("s", "mid"),
        },
        vec![materialize],
    )
    .unwrap();

    let token = ExecutablePlanRunner::run_till_end(&pool, &mut plan)
        .await
        .unwrap();

    assert_eq!(
        conn.executed(),
        vec![
            "select count(*) from s.src".to_string(),
            "create table s.mid as select * from s.src".to_string(),
            "drop table if exists s.mid".to_string(),
        ]
    );
    // root token comes from the drop node
    assert_eq!(token.text(keys::TABLE_NAME), Some("mid"));
    assert!(plan.nodes().iter().all(|node| node.executed));
}

#[tokio::test]
async fn test_failure_aborts_remaining_nodes() {
    let (conn, pool) = scripted_pool();
    conn.fail_on("second");

    let mut plan = ExecutablePlan::new();
    let src = TableRef::new("s", "src");
    let first = plan
        .add_node("first", ctas(&TableRef::new("s", "first"), &src), vec![])
        .unwrap();
    let second = plan
        .add_node(
            "second",
            ctas(&TableRef::new("s", "second"), &src),
            vec![first],
        )
        .unwrap();
    plan.add_node(
        "third",
        ctas(&TableRef::new("s", "third"), &src),
        vec![second],
    )
    .unwrap();

    let error = ExecutablePlanRunner::run_till_end(&pool, &mut plan)
        .await
        .unwrap_err();
    match error {
        ScrambleDbError::NodeExecution { node_id, .. } => assert_eq!(node_id, second.0),
        other => panic!("unexpected error: {other}"),
    }

    // first node's effects are observable, the third never executes
    let executed = conn.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].contains("s.first"));
    assert!(executed[1].contains("s.second"));
    assert!(plan.node(first).executed);
    assert!(!plan.node(second).executed);
}

struct TableFromCount;

impl QueryDecider for TableFromCount {
    fn decide(
        &self,
        tokens: &[Arc<ExecutionInfoToken>],
    ) -> scrambledb_common::Result<SelectQuery> {
        let total: i64 = tokens
            .iter()
            .filter_map(|token| token.count(keys::ROW_COUNT))
            .sum();
        Ok(SelectQuery::star_from(&TableRef::bare(format!(
            "t{total}"
        ))))
    }
}

#[tokio::test]
async fn test_decide_node_combines_dependency_tokens() {
    let (conn, pool) = scripted_pool();
    conn.respond_with("from a", count_result(3));
    conn.respond_with("from b", count_result(4));

    let mut plan = ExecutablePlan::new();
    let probe_a = plan
        .add_node(
            "probe_a",
            NodeKind::Query {
                query: SelectQuery::count_star(&TableRef::bare("a")),
            },
            vec![],
        )
        .unwrap();
    let probe_b = plan
        .add_node(
            "probe_b",
            NodeKind::Query {
                query: SelectQuery::count_star(&TableRef::bare("b")),
            },
            vec![],
        )
        .unwrap();
    let decide = plan
        .add_node(
            "decide",
            NodeKind::Decide {
                decider: Arc::new(TableFromCount),
            },
            vec![probe_a, probe_b],
        )
        .unwrap();
    plan.add_node(
        "materialize",
        NodeKind::CreateTableAsSelect {
            target: TableRef::new("s", "out"),
            source: QuerySource::FromToken {
                dependency: decide,
                key: keys::DEPENDENT_QUERY.to_string(),
            },
        },
        vec![decide],
    )
    .unwrap();

    ExecutablePlanRunner::run_till_end(&pool, &mut plan)
        .await
        .unwrap();

    let executed = conn.executed();
    assert_eq!(executed.len(), 3);
    // the decide node ran in-process: both counts flowed into the statement
    assert_eq!(executed[2], "create table s.out as select * from t7");
}

#[tokio::test]
async fn test_rerun_requires_deepcopy() {
    let (conn, pool) = scripted_pool();

    let mut plan = ExecutablePlan::new();
    let src = TableRef::new("s", "src");
    let root = plan
        .add_node("only", ctas(&TableRef::new("s", "out"), &src), vec![])
        .unwrap();

    ExecutablePlanRunner::run_till_end(&pool, &mut plan)
        .await
        .unwrap();

    // same node objects cannot run twice
    let error = ExecutablePlanRunner::run_till_end(&pool, &mut plan)
        .await
        .unwrap_err();
    assert!(matches!(error, ScrambleDbError::Structural(_)));

    // a deep copy runs independently without touching the original
    let mut copy = plan.deepcopy(root);
    ExecutablePlanRunner::run_till_end(&pool, &mut copy)
        .await
        .unwrap();
    assert_eq!(conn.executed().len(), 2);
    assert!(plan.node(root).executed);
}

#[tokio::test]
async fn test_independent_branches_on_two_connections() {
    let conn_a = Arc::new(ScriptedConnection::new());
    let conn_b = Arc::new(ScriptedConnection::new());
    let pool = ConnectionPool::new(vec![
        conn_a.clone() as Arc<dyn DbConnection>,
        conn_b.clone() as Arc<dyn DbConnection>,
    ])
    .unwrap();

    let mut plan = ExecutablePlan::new();
    let src = TableRef::new("s", "src");
    let left = plan
        .add_node("left", ctas(&TableRef::new("s", "left"), &src), vec![])
        .unwrap();
    let right = plan
        .add_node("right", ctas(&TableRef::new("s", "right"), &src), vec![])
        .unwrap();
    plan.add_node(
        "merge",
        NodeKind::DropTable {
            target: TableRef::new("s", "left"),
        },
        vec![left, right],
    )
    .unwrap();

    ExecutablePlanRunner::run_till_end(&pool, &mut plan)
        .await
        .unwrap();

    // every node ran exactly once across the two sessions
    let total = conn_a.executed().len() + conn_b.executed().len();
    assert_eq!(total, 3);
    assert!(plan.nodes().iter().all(|node| node.executed));
}

#[tokio::test]
async fn test_agg_node_token_carries_aggregation_shape() {
    let (conn, pool) = scripted_pool();
    let id_creator = IdCreator::new("scratch");

    // grouped aggregation whose predicate embeds a subquery, so the node
    // gains a materializing dependency during normalization
    let threshold = SelectQuery::count_star(&TableRef::new("s", "thresholds"));
    let query = SelectQuery::new(
        vec![
            Expr::col("city"),
            Expr::func("sum", vec![Expr::col("amount")]).aliased("total"),
        ],
        vec![Relation::table(TableRef::new("s", "orders"))],
    )
    .with_predicate(
        Expr::col("amount").binary(BinaryOperator::Gt, Expr::Subquery(Box::new(threshold))),
    )
    .with_group_by(vec![Expr::col("city")]);
    let agg_meta = AggMeta {
        group_columns: vec!["city".to_string()],
        measure_columns: vec!["total".to_string()],
    };

    let mut plan = ExecutablePlan::new();
    create_agg_node(
        &mut plan,
        "agg",
        TableRef::new("scratch", "agg_out"),
        query,
        agg_meta.clone(),
        &id_creator,
    )
    .unwrap();

    let token = ExecutablePlanRunner::run_till_end(&pool, &mut plan)
        .await
        .unwrap();

    let executed = conn.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].starts_with("create table scratch.scrambledbtemp_"));
    assert!(executed[0].contains("count(*) from s.thresholds"));
    assert!(executed[1].starts_with("create table scratch.agg_out as select city, sum(amount) as total"));
    assert!(executed[1].contains("select * from scratch.scrambledbtemp_"));
    assert!(executed[1].ends_with("group by city"));

    // the token exposes the aggregation shape and the executed select
    assert_eq!(token.agg_meta(keys::AGG_META), Some(&agg_meta));
    assert_eq!(token.text(keys::TABLE_NAME), Some("agg_out"));
    let executed_select = token.query(keys::DEPENDENT_QUERY).unwrap();
    assert_eq!(executed_select.group_by, vec![Expr::col("city")]);
    assert!(!executed_select.has_placeholders());
}

struct AbortingDecider {
    abort: AbortHandle,
}

impl QueryDecider for AbortingDecider {
    fn decide(
        &self,
        _tokens: &[Arc<ExecutionInfoToken>],
    ) -> scrambledb_common::Result<SelectQuery> {
        self.abort.abort();
        Ok(SelectQuery::star_from(&TableRef::bare("decided")))
    }
}

#[tokio::test]
async fn test_mid_run_abort_keeps_executed_prefix() {
    let (conn, pool) = scripted_pool();
    let abort = AbortHandle::new();

    let mut plan = ExecutablePlan::new();
    let src = TableRef::new("s", "src");
    let first = plan
        .add_node("first", ctas(&TableRef::new("s", "first"), &src), vec![])
        .unwrap();
    let decide = plan
        .add_node(
            "decide",
            NodeKind::Decide {
                decider: Arc::new(AbortingDecider {
                    abort: abort.clone(),
                }),
            },
            vec![first],
        )
        .unwrap();
    let last = plan
        .add_node(
            "last",
            NodeKind::CreateTableAsSelect {
                target: TableRef::new("s", "out"),
                source: QuerySource::FromToken {
                    dependency: decide,
                    key: keys::DEPENDENT_QUERY.to_string(),
                },
            },
            vec![decide],
        )
        .unwrap();

    let error = ExecutablePlanRunner::run_till_end_with_abort(&pool, &mut plan, &abort)
        .await
        .unwrap_err();

    match error {
        ScrambleDbError::Aborted { node_id } => assert_eq!(node_id, last.0),
        other => panic!("unexpected error: {other}"),
    }
    // the prefix executed before the abort stays in place, the rest never runs
    assert_eq!(conn.executed().len(), 1);
    assert!(conn.executed()[0].contains("s.first"));
    assert!(plan.node(first).executed);
    assert!(plan.node(decide).executed);
    assert!(!plan.node(last).executed);
}

#[tokio::test]
async fn test_abort_before_start_executes_nothing() {
    let (conn, pool) = scripted_pool();

    let mut plan = ExecutablePlan::new();
    plan.add_node(
        "only",
        ctas(&TableRef::new("s", "out"), &TableRef::new("s", "src")),
        vec![],
    )
    .unwrap();

    let abort = AbortHandle::new();
    abort.abort();
    let error = ExecutablePlanRunner::run_till_end_with_abort(&pool, &mut plan, &abort)
        .await
        .unwrap_err();

    assert!(matches!(error, ScrambleDbError::Aborted { .. }));
    assert!(conn.executed().is_empty());
}
