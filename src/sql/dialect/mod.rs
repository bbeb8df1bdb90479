//! SQL dialect definitions and formatting rules.
//!
//! Each target engine implements [`SqlDialect`] to handle its syntax:
//!
//! - Identifier quoting: `"` (ANSI/PG/DuckDB), `` ` `` (MySQL/BigQuery), `[]` (T-SQL)
//! - Pagination: `LIMIT n` vs `OFFSET 0 ROWS FETCH NEXT n ROWS ONLY`
//! - Boolean literals: `true`/`false` vs `1`/`0`
//! - Function names and CAST type names
//!
//! | Feature | PostgreSQL | SQL Server | MySQL | DuckDB | Snowflake | BigQuery |
//! |---------|-----------|------------|-------|--------|-----------|----------|
//! | NULLS FIRST/LAST | ✓ | ❌ | ❌ | ✓ | ✓ | ✓ |
//! | FULL OUTER JOIN | ✓ | ✓ | ❌ | ✓ | ✓ | ✓ |
//! | LIMIT | ✓ | ❌ (OFFSET FETCH) | ✓ | ✓ | ✓ | ✓ |

mod bigquery;
mod databricks;
mod duckdb;
pub mod helpers;
mod mysql;
mod postgres;
mod redshift;
mod snowflake;
mod tsql;

pub use bigquery::BigQuery;
pub use databricks::Databricks;
pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use postgres::Postgres;
pub use redshift::Redshift;
pub use snowflake::Snowflake;
pub use tsql::TSql;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::token::TokenStream;
use crate::model::DataType;

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    ///
    /// All dialects use single quotes with `''` for escaping.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    /// Format a boolean literal.
    fn format_bool(&self, b: bool) -> &'static str;

    // =========================================================================
    // Pagination
    // =========================================================================

    /// Emit a row limit clause.
    fn emit_limit(&self, limit: u64) -> TokenStream {
        helpers::emit_limit_standard(limit)
    }

    /// Whether the limit clause is only valid after an ORDER BY.
    ///
    /// T-SQL requires ORDER BY when using OFFSET FETCH.
    fn requires_order_by_for_limit(&self) -> bool {
        false
    }

    // =========================================================================
    // Joins and Ordering
    // =========================================================================

    fn supports_full_outer_join(&self) -> bool {
        true
    }

    /// Whether this dialect supports NULLS FIRST/LAST in ORDER BY.
    fn supports_nulls_ordering(&self) -> bool {
        true
    }

    // =========================================================================
    // Functions and Types
    // =========================================================================

    /// Remap a function name for this dialect.
    ///
    /// Returns `Some(new_name)` if the function should be remapped, `None` to
    /// keep the original. The input is matched case-insensitively.
    fn remap_function(&self, name: &str) -> Option<&'static str> {
        let _ = name;
        None
    }

    /// Type name used in `CAST(x AS type)`.
    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_ansi(dt)
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    DuckDb,
    TSql,
    MySql,
    Postgres,
    Snowflake,
    BigQuery,
    Redshift,
    Databricks,
}

impl Dialect {
    pub const ALL: [Dialect; 8] = [
        Dialect::DuckDb,
        Dialect::TSql,
        Dialect::MySql,
        Dialect::Postgres,
        Dialect::Snowflake,
        Dialect::BigQuery,
        Dialect::Redshift,
        Dialect::Databricks,
    ];

    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::DuckDb => &DuckDb,
            Dialect::Postgres => &Postgres,
            Dialect::TSql => &TSql,
            Dialect::MySql => &MySql,
            Dialect::Snowflake => &Snowflake,
            Dialect::BigQuery => &BigQuery,
            Dialect::Redshift => &Redshift,
            Dialect::Databricks => &Databricks,
        }
    }
}

// Delegate to the concrete dialect types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        self.dialect().format_bool(b)
    }

    fn emit_limit(&self, limit: u64) -> TokenStream {
        self.dialect().emit_limit(limit)
    }

    fn requires_order_by_for_limit(&self) -> bool {
        self.dialect().requires_order_by_for_limit()
    }

    fn supports_full_outer_join(&self) -> bool {
        self.dialect().supports_full_outer_join()
    }

    fn supports_nulls_ordering(&self) -> bool {
        self.dialect().supports_nulls_ordering()
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        self.dialect().remap_function(name)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        self.dialect().emit_data_type(dt)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown dialect `{0}` (expected one of: duckdb, postgres, tsql, mysql, snowflake, bigquery, redshift, databricks)")]
pub struct UnknownDialect(pub String);

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "duckdb" => Ok(Dialect::DuckDb),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "tsql" | "mssql" | "sqlserver" => Ok(Dialect::TSql),
            "mysql" => Ok(Dialect::MySql),
            "snowflake" => Ok(Dialect::Snowflake),
            "bigquery" => Ok(Dialect::BigQuery),
            "redshift" => Ok(Dialect::Redshift),
            "databricks" | "spark" => Ok(Dialect::Databricks),
            _ => Err(UnknownDialect(s.to_string())),
        }
    }
}
