//! Tests for anchor datasource choice and join path selection.

#[path = "../common/mod.rs"]
mod common;

use quarry::compile::{compile, compile_query, load_model, CompileError, CompileOptions};
use quarry::config::Settings;
use quarry::planner::{PlanError, PlannerOptions};
use quarry::semantic::InMemoryResolver;
use quarry::sql::{Dialect, JoinType};

// a - b - d and a - c - d: two equally short routes to d
const DIAMOND: &str = r#"
key a_id int;
key b_id int;
key c_id int;
key d_id int;
property d_id.label string;

datasource a (a_id, b_id, c_id) grain (a_id) address t.a;
datasource b (b_id, d_id) grain (b_id) address t.b;
datasource c (c_id, d_id) grain (c_id) address t.c;
datasource d (d_id, label) grain (d_id) address t.d;
"#;

fn plan_err(source: &str, query: &str, options: &CompileOptions) -> PlanError {
    let model = load_model("main", source, &InMemoryResolver::new()).unwrap();
    match compile_query(&model, query, options) {
        Err(CompileError::Plan { source, .. }) => source,
        Err(other) => panic!("Expected plan error, got {:?}", other),
        Ok(compiled) => panic!("Expected plan error, got SQL:\n{}", compiled.sql),
    }
}

// ============================================================================
// Anchor choice
// ============================================================================

#[test]
fn test_anchor_matches_implied_grain() {
    let compiled = common::compile_shop("select orders.status, count(*) -> n;", Dialect::DuckDb).unwrap();
    assert_eq!(compiled.datasources, vec!["orders"]);
    assert!(compiled.sql.contains("FROM \"tpch\".\"orders\" AS \"orders\""));
    assert!(!compiled.sql.contains("JOIN"));
}

#[test]
fn test_anchor_at_finer_grain_joins_outward() {
    let compiled =
        common::compile_shop("select orders.id, customer.name;", Dialect::DuckDb).unwrap();
    assert_eq!(compiled.datasources, vec!["orders", "customers"]);
    assert!(compiled.sql.contains(
        "LEFT JOIN \"tpch\".\"customer\" AS \"customers\" ON \"orders\".\"o_custkey\" = \"customers\".\"c_custkey\""
    ));
    common::validate_sql(&compiled.sql, Dialect::DuckDb).unwrap();
}

#[test]
fn test_foreign_key_read_from_anchor() {
    // customer.id is mapped by orders too; the anchor supplies it
    let compiled =
        common::compile_shop("select customer.id, orders.id;", Dialect::DuckDb).unwrap();
    assert_eq!(compiled.datasources, vec!["orders"]);
    assert!(compiled
        .sql
        .contains("\"orders\".\"o_custkey\" AS \"customer_id\""));
}

#[test]
fn test_pure_aggregate_anchor() {
    let compiled =
        common::compile_shop("select sum(orders.total_price) -> revenue;", Dialect::DuckDb).unwrap();
    assert_eq!(compiled.datasources, vec!["orders"]);
    assert!(!compiled.sql.contains("GROUP BY"));
}

#[test]
fn test_filter_concepts_pull_in_joins() {
    let compiled = common::compile_shop(
        "select sum(orders.total_price) -> revenue where customer.nation = 'DE';",
        Dialect::Postgres,
    )
    .unwrap();
    // Without a grain, ties on missing concepts go to declaration order
    assert_eq!(compiled.datasources, vec!["customers", "orders"]);
    assert!(compiled.sql.contains("WHERE \"customers\".\"c_nation\" = 'DE'"));
    common::validate_sql(&compiled.sql, Dialect::Postgres).unwrap();
}

// ============================================================================
// Join paths
// ============================================================================

#[test]
fn test_first_declared_route_wins() {
    let output = compile(
        "main",
        &format!("{}select a_id, label;", DIAMOND),
        &InMemoryResolver::new(),
        &CompileOptions::default(),
    )
    .unwrap();
    let compiled = &output.queries[0];
    assert_eq!(compiled.datasources, vec!["a", "b", "d"]);
    assert!(compiled
        .sql
        .contains("LEFT JOIN \"t\".\"b\" AS \"b\" ON \"a\".\"b_id\" = \"b\".\"b_id\""));
    assert!(compiled
        .sql
        .contains("LEFT JOIN \"t\".\"d\" AS \"d\" ON \"b\".\"d_id\" = \"d\".\"d_id\""));
}

#[test]
fn test_strict_join_paths_reject_ties() {
    let options = CompileOptions::default().with_planner(PlannerOptions {
        strict_join_paths: true,
        ..PlannerOptions::default()
    });
    match plan_err(DIAMOND, "select a_id, label;", &options) {
        PlanError::AmbiguousJoinPath {
            concept,
            candidates,
            paths,
            ..
        } => {
            assert_eq!(concept, "label");
            assert_eq!(paths, 2);
            assert!(!candidates.is_empty());
        }
        other => panic!("Expected AmbiguousJoinPath, got {:?}", other),
    }
}

#[test]
fn test_strict_join_paths_allow_unique_route() {
    let options = CompileOptions::default().with_planner(PlannerOptions {
        strict_join_paths: true,
        ..PlannerOptions::default()
    });
    let model = common::shop_model(common::SHOP_ROOT);
    let compiled = compile_query(&model, "select orders.id, customer.name;", &options).unwrap();
    assert_eq!(compiled.datasources, vec!["orders", "customers"]);
}

#[test]
fn test_no_join_path() {
    let source = r#"
key x_id int;
key y_id int;
datasource xs (x_id) grain (x_id) address t.x;
datasource ys (y_id) grain (y_id) address t.y;
"#;
    match plan_err(source, "select x_id, y_id;", &CompileOptions::default()) {
        PlanError::NoJoinPath { concept, from, span } => {
            assert_eq!(concept, "y_id");
            assert_eq!(from, "xs");
            assert_eq!(span, 13..17);
        }
        other => panic!("Expected NoJoinPath, got {:?}", other),
    }
}

// ============================================================================
// Join type
// ============================================================================

#[test]
fn test_join_type_from_settings() {
    let settings = Settings::from_toml(
        r#"
[compiler]
dialect = "postgres"

[planner]
join_type = "inner"
"#,
    )
    .unwrap();
    let options = settings.compile_options();
    assert_eq!(options.planner.join_type, JoinType::Inner);

    let model = common::shop_model(common::SHOP_ROOT);
    let compiled = compile_query(&model, "select orders.id, customer.name;", &options).unwrap();
    assert_eq!(compiled.dialect, Dialect::Postgres);
    assert!(compiled.sql.contains("INNER JOIN \"tpch\".\"customer\""));
    common::validate_sql(&compiled.sql, Dialect::Postgres).unwrap();
}

#[test]
fn test_full_join_downgraded_without_support() {
    let options = CompileOptions::default()
        .with_dialect(Dialect::MySql)
        .with_planner(PlannerOptions {
            join_type: JoinType::Full,
            ..PlannerOptions::default()
        });
    let model = common::shop_model(common::SHOP_ROOT);
    let compiled = compile_query(&model, "select orders.id, customer.name;", &options).unwrap();
    assert!(compiled.sql.contains("LEFT JOIN `tpch`.`customer`"));
    assert!(!compiled.sql.contains("FULL"));
}
