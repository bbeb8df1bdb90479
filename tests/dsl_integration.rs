//! Integration tests for the DSL lexer and parser.
//!
//! These tests parse complete, realistic model files and verify the entire
//! parsing pipeline (lexer + parser) produces the expected AST structure.

mod common;

use quarry::dsl::lexer::{lex, lex_with_comments, TokenKind};
use quarry::dsl::{
    self, AddressRef, AggregateFunc, ConceptKind, Expr, OwnerRef, SortDirection, Statement,
};

// ============================================================================
// Model files
// ============================================================================

#[test]
fn test_customer_model_parses() {
    let result = dsl::parse(common::CUSTOMER);
    assert!(result.is_ok(), "{:?}", result.diagnostics);

    let script = result.script.unwrap();
    let names: Vec<_> = script.concepts().map(|c| c.name.value.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "nation"]);

    let ds = script.datasources().next().unwrap();
    assert_eq!(ds.name.value, "customers");
    assert_eq!(ds.columns.len(), 3);
    assert_eq!(ds.columns[0].column.value, "c_custkey");
    assert_eq!(
        ds.address.value,
        AddressRef::Table(vec!["tpch".into(), "customer".into()])
    );
    let grain: Vec<String> = ds
        .grain
        .as_ref()
        .unwrap()
        .iter()
        .map(|g| g.value.to_string())
        .collect();
    assert_eq!(grain, vec!["id"]);
}

#[test]
fn test_order_model_references_import() {
    let script = dsl::parse(common::ORDER).script.unwrap();

    let import = script.imports().next().unwrap();
    assert_eq!(import.path.value, "customer");
    assert_eq!(import.alias.value, "customer");

    let ds = script.datasources().next().unwrap();
    let mapped: Vec<String> = ds.columns.iter().map(|c| c.concept.value.to_string()).collect();
    assert_eq!(
        mapped,
        vec!["id", "customer.id", "total_price", "status", "order_date"]
    );
}

#[test]
fn test_composite_and_derived_concepts() {
    let script = dsl::parse(
        r#"
        import part;
        import supplier;
        property <part.id, supplier.id>.available_qty int;
        metric total_qty <- sum(available_qty);
        auto qty_band <- case_band(available_qty::float);
        "#,
    )
    .script
    .unwrap();

    let concepts: Vec<_> = script.concepts().collect();
    assert_eq!(concepts.len(), 3);
    match &concepts[0].owner {
        Some(OwnerRef::Composite(keys)) => assert_eq!(keys.len(), 2),
        other => panic!("Expected composite owner, got {:?}", other),
    }
    assert_eq!(concepts[1].kind, ConceptKind::Metric);
    assert!(concepts[1]
        .derivation
        .as_ref()
        .unwrap()
        .value
        .contains_aggregate());
    assert_eq!(concepts[2].kind, ConceptKind::Auto);
}

#[test]
fn test_file_and_raw_addresses() {
    let script = dsl::parse(
        r#"
        key id int;
        datasource events (id) address 'data/events.parquet';
        datasource legacy (id) address `warehouse.dbo.Legacy Events`;
        "#,
    )
    .script
    .unwrap();

    let addresses: Vec<_> = script.datasources().map(|d| d.address.value.clone()).collect();
    assert_eq!(
        addresses,
        vec![
            AddressRef::File("data/events.parquet".into()),
            AddressRef::Quoted("warehouse.dbo.Legacy Events".into()),
        ]
    );
    assert!(script.datasources().all(|d| d.grain.is_none()));
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_full_query() {
    let script = dsl::parse(
        r#"
        import customer;
        import orders;

        where orders.status = 'F'
        select
            customer.id,
            customer.name -> customer_name,
            sum(orders.total_price) as revenue,
            count(*) by customer.nation -> nation_orders
        having revenue > 1000
        order by revenue desc nulls last, customer.id
        limit 10;
        "#,
    )
    .script
    .unwrap();

    let query = script.queries().next().unwrap();
    let query = query.value;
    assert_eq!(query.selects.len(), 4);
    assert_eq!(
        query.selects[1].alias.as_ref().map(|a| a.value.as_str()),
        Some("customer_name")
    );
    match &query.selects[3].expr.value {
        Expr::Aggregate { func, arg, by } => {
            assert_eq!(*func, AggregateFunc::Count);
            assert!(arg.is_none());
            assert_eq!(by[0].value.to_string(), "customer.nation");
        }
        other => panic!("Expected aggregate, got {:?}", other),
    }
    assert!(query.where_clause.is_some());
    assert!(query.having.is_some());
    assert_eq!(query.order_by.len(), 2);
    assert_eq!(query.order_by[0].direction, SortDirection::Desc);
    assert_eq!(query.order_by[1].direction, SortDirection::Asc);
    assert_eq!(query.limit.as_ref().map(|l| l.value), Some(10));
}

#[test]
fn test_literal_query() {
    let script = dsl::parse("select 1 -> echo;").script.unwrap();
    assert_eq!(script.statements.len(), 1);
    match &script.statements[0].value {
        Statement::Query(q) => assert_eq!(q.selects[0].alias.as_ref().unwrap().value, "echo"),
        other => panic!("Expected query, got {:?}", other),
    }
}

#[test]
fn test_keywords_are_case_insensitive() {
    let result = dsl::parse("KEY id INT;\nSELECT id ORDER BY id DESC LIMIT 1;");
    assert!(result.is_ok(), "{:?}", result.diagnostics);
}

// ============================================================================
// Lexing
// ============================================================================

#[test]
fn test_comments_are_dropped() {
    let source = "# header\nkey id int; // trailing\n/* block\ncomment */ select id;";
    let with = lex_with_comments(source).unwrap();
    let without = lex(source).unwrap();
    assert_eq!(
        with.iter()
            .filter(|(t, _)| t.kind() == TokenKind::Comment)
            .count(),
        3
    );
    assert!(without.iter().all(|(t, _)| t.kind() != TokenKind::Comment));

    let parsed = dsl::parse(source).script.unwrap();
    assert_eq!(parsed.statements.len(), 2);
}

#[test]
fn test_unterminated_comment_reports_position() {
    let result = dsl::parse("key id int;\n/* never closed");
    assert!(result.script.is_none());
    assert_eq!(result.diagnostics.len(), 1);
    assert!(result.diagnostics[0].message.contains("2:1"));
}

// ============================================================================
// Error recovery
// ============================================================================

#[test]
fn test_missing_semicolon_recovers_at_next_statement() {
    let source = "key id int\nproperty id.name string;\nkey other int;";
    let result = dsl::parse(source);

    assert_eq!(result.errors().count(), 1);
    let diag = &result.diagnostics[0];
    assert_eq!(diag.span, 11..19, "error should point at the next token");
    assert_eq!(diag.message, "expected `;`, found `property`");

    let script = result.script.unwrap();
    let names: Vec<_> = script.concepts().map(|c| c.name.value.as_str()).collect();
    assert_eq!(names, vec!["other"]);
}

#[test]
fn test_every_malformed_statement_reported() {
    let source = r#"
        key id int;
        property id.;
        datasource (x) address t;
        select id,;
        select id;
    "#;
    let result = dsl::parse(source);
    assert_eq!(result.errors().count(), 3);
    let script = result.script.unwrap();
    assert_eq!(script.statements.len(), 2);
    assert_eq!(script.queries().count(), 1);
}
