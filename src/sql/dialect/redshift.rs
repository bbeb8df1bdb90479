//! Redshift renders like PostgreSQL apart from its type names.

use super::helpers;
use super::SqlDialect;
use crate::model::DataType;

/// Amazon Redshift SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Redshift;

impl SqlDialect for Redshift {
    fn name(&self) -> &'static str {
        "redshift"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_redshift(name)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_redshift(dt)
    }
}
