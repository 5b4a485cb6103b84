//! End-to-end scramble runs over a scripted connection.

use scrambledb_common::{
    ConnectionPool, QueryResult, ScrambleDbError, ScriptedConnection, Value, BLOCK_COLUMN_NAME,
    SCRAMBLE_BLOCK_SIZE,
};
use scrambledb_coordinator::ScramblingCoordinator;
use std::collections::HashMap;
use std::sync::Arc;

fn scripted_source(row_count: i64) -> Arc<ScriptedConnection> {
    let conn = Arc::new(ScriptedConnection::new());
    // group-statistics rule first: that query also contains "count(*)"
    conn.respond_with(
        "sum(case",
        QueryResult::single_row(
            vec!["groups".to_string(), "rare_rows".to_string()],
            vec![Value::Int(5), Value::Int(20)],
        ),
    );
    conn.respond_with(
        "count(*)",
        QueryResult::single_row(vec!["c".to_string()], vec![Value::Int(row_count)]),
    );
    conn.respond_with(
        "(1 = 0)",
        QueryResult::empty(vec!["id".to_string(), "price".to_string()]),
    );
    conn
}

fn pool(conn: &Arc<ScriptedConnection>) -> ConnectionPool {
    ConnectionPool::single(conn.clone() as Arc<dyn scrambledb_common::DbConnection>)
}

#[tokio::test]
async fn test_uniform_scramble_statement_sequence() {
    let conn = scripted_source(250);
    let coordinator = ScramblingCoordinator::new(pool(&conn)).with_block_size(100);

    let meta = coordinator.scramble("s", "orders").await.unwrap();

    let executed = conn.executed();
    assert_eq!(executed.len(), 3);
    assert_eq!(executed[0], "select count(*) from s.orders");
    assert_eq!(executed[1], "select * from s.orders where (1 = 0)");
    assert!(executed[2].starts_with("create table s.orders_scrambled as select id, price, 0 as verdictdbtier"));
    assert!(executed[2].contains("rand() as scrambledb_block_rand"));
    assert!(executed[2].contains("from s.orders scrambledb_t"));

    assert_eq!(meta.schema_name, "s");
    assert_eq!(meta.table_name, "orders_scrambled");
    assert_eq!(meta.original_table_name, "orders");
    assert_eq!(meta.tier_count, 1);
    assert_eq!(meta.block_count, 3); // ceil(250 / 100)
    assert_eq!(meta.block_column, "verdictdbblock");
    assert_eq!(meta.tier_column, "verdictdbtier");
    let distribution = &meta.cumulative_distributions[&0];
    assert_eq!(distribution.len(), 3);
    assert!((distribution[2] - 1.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_custom_options_override_per_call() {
    let conn = scripted_source(10);
    let coordinator = ScramblingCoordinator::new(pool(&conn));

    let mut custom = HashMap::new();
    custom.insert(BLOCK_COLUMN_NAME.to_string(), "myblk".to_string());
    custom.insert(SCRAMBLE_BLOCK_SIZE.to_string(), "5".to_string());
    let meta = coordinator
        .scramble_full("s", "orders", "s", "orders_x", "uniform", None, &custom)
        .await
        .unwrap();

    assert_eq!(meta.block_column, "myblk");
    // the unmentioned tier column keeps its default
    assert_eq!(meta.tier_column, "verdictdbtier");
    assert_eq!(meta.block_count, 2);
    let ctas = &conn.executed()[2];
    assert!(ctas.contains("as myblk"));
    assert!(ctas.contains("as verdictdbtier"));
}

#[tokio::test]
async fn test_unknown_method_executes_nothing() {
    let conn = scripted_source(10);
    let coordinator = ScramblingCoordinator::new(pool(&conn));

    let error = coordinator
        .scramble_with_method("s", "orders", "s", "orders_x", "hashed", None)
        .await
        .unwrap_err();

    assert!(matches!(error, ScrambleDbError::Configuration(_)));
    assert!(conn.executed().is_empty());
}

#[tokio::test]
async fn test_fastconverge_without_scratchpad_executes_nothing() {
    let conn = scripted_source(10);
    let coordinator = ScramblingCoordinator::new(pool(&conn));

    let error = coordinator
        .scramble_with_method("s", "orders", "s", "orders_x", "FastConverge", None)
        .await
        .unwrap_err();

    assert!(matches!(error, ScrambleDbError::Configuration(_)));
    assert!(conn.executed().is_empty());
}

#[tokio::test]
async fn test_fastconverge_has_three_tiers() {
    let conn = scripted_source(1110);
    let coordinator = ScramblingCoordinator::new(pool(&conn))
        .with_scratchpad_schema("scratch")
        .with_block_size(10);

    let meta = coordinator
        .scramble_with_method("s", "orders", "s", "orders_fc", "fastconverge", None)
        .await
        .unwrap();

    assert_eq!(meta.tier_count, 3);
    assert_eq!(meta.block_count, 111); // tiers of 10, 100 and 1000 rows
    for tier in 0..3 {
        let distribution = &meta.cumulative_distributions[&tier];
        assert!((distribution[distribution.len() - 1] - 1.0).abs() < 1e-12);
    }
    // without a primary column no lookup table is materialized
    assert_eq!(conn.executed().len(), 3);
}

#[tokio::test]
async fn test_stratified_fastconverge_builds_and_drops_lookup() {
    let conn = scripted_source(1000);
    let coordinator = ScramblingCoordinator::new(pool(&conn))
        .with_scratchpad_schema("scratch")
        .with_block_size(100);

    let meta = coordinator
        .scramble_with_method("s", "orders", "s", "orders_fc", "fastconverge", Some("city"))
        .await
        .unwrap();

    let executed = conn.executed();
    assert_eq!(executed.len(), 6);

    let lookup_ctas = executed
        .iter()
        .find(|sql| sql.contains("create table scratch.scrambledbtemp_"))
        .unwrap();
    assert!(lookup_ctas.contains("group by city"));
    assert!(lookup_ctas.contains("count(*) as scrambledb_group_size"));

    let stats_probe = executed.iter().find(|sql| sql.contains("sum(case")).unwrap();
    assert!(stats_probe.contains("scrambledb_group_size <= 1"));

    let scramble_ctas = executed
        .iter()
        .find(|sql| sql.starts_with("create table s.orders_fc"))
        .unwrap();
    assert!(scramble_ctas.contains("inner join scratch.scrambledbtemp_"));
    assert!(scramble_ctas.contains("scrambledb_t.city = scrambledb_g.city"));

    // cleanup runs last
    assert!(executed[5].starts_with("drop table if exists scratch.scrambledbtemp_"));

    assert_eq!(meta.tier_count, 3);
    // tier 0 holds the 20 rare rows reported by the stats probe
    assert_eq!(meta.cumulative_distributions[&0].len(), 1);
}

#[tokio::test]
async fn test_scramble_schema_sets_default_target() {
    let conn = scripted_source(10);
    let coordinator = ScramblingCoordinator::new(pool(&conn)).with_scramble_schema("verdict");

    let meta = coordinator.scramble("s", "orders").await.unwrap();

    assert_eq!(meta.schema_name, "verdict");
    assert_eq!(meta.table_name, "orders_scrambled");
    assert!(conn.executed()[2].starts_with("create table verdict.orders_scrambled as "));
}
