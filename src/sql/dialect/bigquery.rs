//! BigQuery: backtick quoting, `INT64`/`FLOAT64`/`STRING` casts.

use super::helpers;
use super::SqlDialect;
use crate::model::DataType;

/// BigQuery SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct BigQuery;

impl SqlDialect for BigQuery {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_bigquery(name)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_bigquery(dt)
    }
}
