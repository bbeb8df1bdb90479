//! MySQL: backticks, numeric booleans, no FULL OUTER JOIN or NULLS ordering.

use super::helpers;
use super::SqlDialect;
use crate::model::DataType;

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn supports_full_outer_join(&self) -> bool {
        false
    }

    fn supports_nulls_ordering(&self) -> bool {
        false
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_mysql(name)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_mysql(dt)
    }
}
