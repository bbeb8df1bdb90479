//! Tests for grouping, `by` windows and aggregate restrictions.

#[path = "../common/mod.rs"]
mod common;

use quarry::compile::CompileError;
use quarry::planner::{CompiledQuery, PlanError};
use quarry::sql::Dialect;

fn plan(query: &str) -> CompiledQuery {
    common::compile_shop(query, Dialect::DuckDb)
        .unwrap_or_else(|e| panic!("query should plan: {:?}", e))
}

fn plan_err(query: &str) -> PlanError {
    match common::compile_shop(query, Dialect::DuckDb) {
        Err(CompileError::Plan { source, .. }) => source,
        Err(other) => panic!("Expected plan error, got {:?}", other),
        Ok(compiled) => panic!("Expected plan error, got SQL:\n{}", compiled.sql),
    }
}

fn assert_unsupported(query: &str, needle: &str) {
    match plan_err(query) {
        PlanError::UnsupportedAggregateCombination { reason, .. } => {
            assert!(reason.contains(needle), "reason `{}` lacks `{}`", reason, needle)
        }
        other => panic!("Expected UnsupportedAggregateCombination, got {:?}", other),
    }
}

// ============================================================================
// Grouping
// ============================================================================

#[test]
fn test_group_by_selected_concepts() {
    let compiled = plan("select customer.nation, orders.status, count(*) -> n;");
    assert!(compiled
        .sql
        .contains("GROUP BY \"customers\".\"c_nation\", \"orders\".\"o_orderstatus\""));
    assert!(compiled.sql.contains("COUNT(*) AS \"n\""));
    common::validate_sql(&compiled.sql, Dialect::DuckDb).unwrap();
}

#[test]
fn test_having_filters_groups() {
    let compiled = plan("select customer.id, sum(orders.total_price) -> revenue having revenue > 100;");
    assert!(compiled
        .sql
        .contains("HAVING SUM(\"orders\".\"o_totalprice\") > 100"));
    common::validate_sql(&compiled.sql, Dialect::DuckDb).unwrap();
}

#[test]
fn test_order_by_aggregate_not_selected() {
    let compiled = plan("select customer.name order by count(*) desc;");
    assert!(compiled.sql.contains("GROUP BY \"customers\".\"c_name\""));
    assert!(compiled.sql.ends_with("ORDER BY COUNT(*) DESC"));
}

// ============================================================================
// `by` aggregates
// ============================================================================

#[test]
fn test_by_without_grouping_is_window() {
    let compiled = plan(
        "select orders.id, orders.total_price, sum(orders.total_price) by customer.id -> customer_total;",
    );
    assert!(compiled.sql.starts_with("SELECT DISTINCT\n"));
    assert!(compiled.sql.contains(
        "SUM(\"orders\".\"o_totalprice\") OVER (PARTITION BY \"orders\".\"o_custkey\") AS \"customer_total\""
    ));
    assert!(!compiled.sql.contains("GROUP BY"));
    assert_eq!(compiled.datasources, vec!["orders"]);
    common::validate_sql(&compiled.sql, Dialect::DuckDb).unwrap();
}

#[test]
fn test_by_alone_groups_by_partition() {
    // Equal totals for two customers must stay two rows
    let compiled = plan("select sum(orders.total_price) by customer.id -> t;");
    assert_eq!(
        compiled.sql,
        "SELECT\n  SUM(\"orders\".\"o_totalprice\") AS \"t\"\n\
         FROM \"tpch\".\"orders\" AS \"orders\"\n\
         GROUP BY \"orders\".\"o_custkey\""
    );
    assert_eq!(compiled.schema.len(), 1);
    common::validate_sql(&compiled.sql, Dialect::DuckDb).unwrap();
}

#[test]
fn test_by_alone_with_filter_and_order() {
    let compiled = plan(
        "select count(*) by customer.id -> n, sum(orders.total_price) by customer.id -> t \
         where orders.status = 'O' order by t desc;",
    );
    assert!(!compiled.sql.contains("DISTINCT"));
    assert!(compiled.sql.contains("COUNT(*) AS \"n\""));
    assert!(compiled.sql.contains("GROUP BY \"orders\".\"o_custkey\""));
    assert!(compiled.sql.ends_with("ORDER BY \"t\" DESC"));
    common::validate_sql(&compiled.sql, Dialect::DuckDb).unwrap();
}

#[test]
fn test_count_distinct_window() {
    let compiled = plan("select orders.id, count_distinct(orders.status) by customer.id -> statuses;");
    assert!(compiled.sql.contains(
        "COUNT(DISTINCT \"orders\".\"o_orderstatus\") OVER (PARTITION BY \"orders\".\"o_custkey\")"
    ));
}

#[test]
fn test_by_at_query_grain_is_plain_aggregate() {
    let compiled = plan(
        "select customer.id, count(*) -> n, sum(orders.total_price) by customer.id -> total;",
    );
    assert!(compiled
        .sql
        .contains("SUM(\"orders\".\"o_totalprice\") AS \"total\""));
    assert!(!compiled.sql.contains("OVER"));
    assert!(compiled.sql.ends_with("GROUP BY \"customers\".\"c_custkey\""));
}

#[test]
fn test_by_coarser_than_grain_reaggregates() {
    let compiled = plan(
        "select customer.id, orders.id, count(*) -> n, count(*) by customer.id -> per_customer;",
    );
    assert!(compiled.sql.contains(
        "SUM(COUNT(*)) OVER (PARTITION BY \"orders\".\"o_custkey\") AS \"per_customer\""
    ));
    assert!(compiled
        .sql
        .contains("GROUP BY \"orders\".\"o_custkey\", \"orders\".\"o_orderkey\""));
    common::validate_sql(&compiled.sql, Dialect::DuckDb).unwrap();
}

#[test]
fn test_min_max_reaggregate_with_themselves() {
    let compiled = plan(
        "select customer.id, orders.id, max(orders.total_price) -> top, \
         max(orders.total_price) by customer.id -> customer_top;",
    );
    assert!(compiled.sql.contains(
        "MAX(MAX(\"orders\".\"o_totalprice\")) OVER (PARTITION BY \"orders\".\"o_custkey\")"
    ));
}

#[test]
fn test_ordering_windowed_query_by_output() {
    let compiled = plan(
        "select orders.id, sum(orders.total_price) by customer.id -> total order by total desc;",
    );
    assert!(compiled.sql.ends_with("ORDER BY \"total\" DESC"));
}

// ============================================================================
// Rejected combinations
// ============================================================================

#[test]
fn test_avg_cannot_reaggregate() {
    assert_unsupported(
        "select customer.id, orders.id, count(*) -> n, avg(orders.total_price) by customer.id -> a;",
        "re-aggregated",
    );
}

#[test]
fn test_by_outside_grain() {
    assert_unsupported(
        "select customer.id, count(*) -> n, count(*) by orders.status -> s;",
        "grouping grain",
    );
}

#[test]
fn test_by_partition_not_fixed_by_selection() {
    assert_unsupported(
        "select orders.status, sum(orders.total_price) by customer.id -> t;",
        "must be selected to partition",
    );
}

#[test]
fn test_by_alone_needs_one_by_list() {
    assert_unsupported(
        "select count(*) by customer.id -> a, count(*) by orders.status -> b;",
        "share one `by` list",
    );
}

#[test]
fn test_nested_aggregates() {
    assert_unsupported("select sum(count(*));", "nested");
}

#[test]
fn test_mixed_aggregate_item() {
    assert_unsupported(
        "select orders.total_price - sum(orders.total_price);",
        "must be aggregated",
    );
}

#[test]
fn test_aggregate_in_where() {
    assert_unsupported(
        "select customer.id where count(*) > 1;",
        "not allowed in `where`",
    );
}

#[test]
fn test_window_in_having() {
    assert_unsupported(
        "select orders.id, sum(orders.total_price) by customer.id -> t having t > 10;",
        "`having`",
    );
}

#[test]
fn test_windowed_query_orders_by_selected_items_only() {
    match plan_err("select orders.id, sum(orders.total_price) by customer.id -> t order by orders.status;") {
        PlanError::InvalidOrdering { reason, .. } => assert!(reason.contains("selected items")),
        other => panic!("Expected InvalidOrdering, got {:?}", other),
    }
}

#[test]
fn test_grouped_query_orders_by_grouped_concepts() {
    match plan_err("select customer.id, count(*) -> n order by orders.status;") {
        PlanError::InvalidOrdering { reason, .. } => assert!(reason.contains("not grouped")),
        other => panic!("Expected InvalidOrdering, got {:?}", other),
    }
}
