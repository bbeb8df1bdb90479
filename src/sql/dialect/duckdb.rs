//! DuckDB: ANSI quoting with its own cast type names.

use super::helpers;
use super::SqlDialect;
use crate::model::DataType;

/// DuckDB SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    // Uses default emit_limit (LIMIT n)

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_duckdb(name)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_duckdb(dt)
    }
}
