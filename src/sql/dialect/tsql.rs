//! T-SQL: bracket quoting, numeric booleans, `OFFSET ... FETCH` limits.

use super::helpers;
use super::SqlDialect;
use crate::model::DataType;
use crate::sql::token::TokenStream;

/// T-SQL (SQL Server) dialect.
#[derive(Debug, Clone, Copy)]
pub struct TSql;

impl SqlDialect for TSql {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_bracket(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        // N prefix for non-ASCII
        if !s.is_ascii() {
            helpers::quote_string_unicode(s)
        } else {
            helpers::quote_string_single(s)
        }
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn emit_limit(&self, limit: u64) -> TokenStream {
        helpers::emit_limit_tsql(limit)
    }

    fn requires_order_by_for_limit(&self) -> bool {
        true
    }

    fn supports_nulls_ordering(&self) -> bool {
        // SQL Server 2022+ only
        false
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_tsql(name)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_tsql(dt)
    }
}
