//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use quarry::compile::{compile_query, load_model, CompileOptions, CompileResult};
use quarry::model::Model;
use quarry::planner::CompiledQuery;
use quarry::semantic::InMemoryResolver;
use quarry::sql::Dialect;

pub use quarry::sql::test_utils::validate_sql;

/// Customer model, imported by the order model.
pub const CUSTOMER: &str = r#"
# Customers of the shop
key id int;
property id.name string;
property id.nation string;

datasource customers (
    c_custkey: id,
    c_name: name,
    c_nation: nation
)
grain (id)
address tpch.customer;
"#;

/// Order model; `customer.id` references the imported customer key.
pub const ORDER: &str = r#"
import customer;

key id int;
property id.total_price float;
property id.status string;
property id.order_date date;

datasource orders (
    o_orderkey: id,
    o_custkey: customer.id,
    o_totalprice: total_price,
    o_orderstatus: status,
    o_orderdate: order_date
)
grain (id)
address tpch.orders;
"#;

/// Resolver holding the customer and order models.
pub fn shop_resolver() -> InMemoryResolver {
    InMemoryResolver::new()
        .with("customer", CUSTOMER)
        .with("orders", ORDER)
}

/// Bind `root` against the shop resolver.
pub fn shop_model(root: &str) -> Arc<Model> {
    load_model("main", root, &shop_resolver()).expect("model should bind")
}

/// Root file importing both shop models.
pub const SHOP_ROOT: &str = "import customer;\nimport orders;\n";

/// Compile one ad-hoc query against the shop models.
pub fn compile_shop(query: &str, dialect: Dialect) -> CompileResult<CompiledQuery> {
    let model = shop_model(SHOP_ROOT);
    compile_query(&model, query, &CompileOptions::default().with_dialect(dialect))
}
