//! Databricks (Spark SQL): backtick quoting, no validator in sqlparser.

use super::helpers;
use super::SqlDialect;
use crate::model::DataType;

/// Databricks (Spark SQL) dialect.
#[derive(Debug, Clone, Copy)]
pub struct Databricks;

impl SqlDialect for Databricks {
    fn name(&self) -> &'static str {
        "databricks"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_databricks(name)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_databricks(dt)
    }
}
