//! Rendering pieces shared by several dialects.

// =============================================================================
// Identifier Quoting
// =============================================================================

/// Quote identifier with double quotes (ANSI style).
pub fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote identifier with backticks.
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quote identifier with square brackets.
pub fn quote_bracket(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

// =============================================================================
// String Quoting
// =============================================================================

/// Quote string with single quotes (standard SQL).
pub fn quote_string_single(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote string with N prefix for Unicode (T-SQL).
pub fn quote_string_unicode(s: &str) -> String {
    format!("N'{}'", s.replace('\'', "''"))
}

// =============================================================================
// Boolean Formatting
// =============================================================================

/// Format boolean as literal true/false.
pub fn format_bool_literal(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Format boolean as numeric 1/0.
pub fn format_bool_numeric(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

// =============================================================================
// Pagination
// =============================================================================

use super::super::token::{Token, TokenStream};

/// Emit `LIMIT n` (standard SQL).
pub fn emit_limit_standard(limit: u64) -> TokenStream {
    let mut ts = TokenStream::new();
    ts.push(Token::Limit).space().push(Token::LitInt(limit as i64));
    ts
}

/// Emit `OFFSET 0 ROWS FETCH NEXT n ROWS ONLY` (T-SQL style).
pub fn emit_limit_tsql(limit: u64) -> TokenStream {
    let mut ts = TokenStream::new();
    ts.push(Token::Offset)
        .space()
        .push(Token::LitInt(0))
        .space()
        .push(Token::Rows)
        .space()
        .push(Token::Fetch)
        .space()
        .push(Token::Next)
        .space()
        .push(Token::LitInt(limit as i64))
        .space()
        .push(Token::Rows)
        .space()
        .push(Token::Only);
    ts
}

// =============================================================================
// Function Remapping
// =============================================================================

/// Remap functions for Postgres dialect.
pub fn remap_function_postgres(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "STRFTIME" => Some("TO_CHAR"),
        "DATE_FORMAT" => Some("TO_CHAR"),
        "FORMAT" => Some("TO_CHAR"),
        "NVL" => Some("COALESCE"),
        "IFNULL" => Some("COALESCE"),
        "ISNULL" => Some("COALESCE"),
        _ => None,
    }
}

/// Remap functions for DuckDB dialect.
pub fn remap_function_duckdb(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "TO_CHAR" => Some("STRFTIME"),
        "DATE_FORMAT" => Some("STRFTIME"),
        "FORMAT" => Some("STRFTIME"),
        "NVL" => Some("COALESCE"),
        "IFNULL" => Some("COALESCE"),
        "ISNULL" => Some("COALESCE"),
        _ => None,
    }
}

/// Remap functions for MySQL dialect.
pub fn remap_function_mysql(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "STRFTIME" => Some("DATE_FORMAT"),
        "TO_CHAR" => Some("DATE_FORMAT"),
        "NOW" => None, // NOW() works in MySQL
        "NVL" => Some("IFNULL"),
        "ISNULL" => Some("IFNULL"),
        "SUBSTR" => Some("SUBSTRING"),
        _ => None,
    }
}

/// Remap functions for T-SQL dialect.
pub fn remap_function_tsql(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "LENGTH" => Some("LEN"),
        "SUBSTR" => Some("SUBSTRING"),
        "NOW" => Some("GETDATE"),
        "CURRENT_TIMESTAMP" => Some("GETDATE"),
        "STRFTIME" => Some("FORMAT"),
        "TO_CHAR" => Some("FORMAT"),
        "DATE_FORMAT" => Some("FORMAT"),
        "NVL" => Some("ISNULL"),
        "IFNULL" => Some("ISNULL"),
        _ => None,
    }
}

/// Remap functions for Snowflake dialect.
pub fn remap_function_snowflake(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "STRFTIME" => Some("TO_CHAR"),
        "DATE_FORMAT" => Some("TO_CHAR"),
        "NVL" => None, // NVL is native to Snowflake
        "IFNULL" => Some("NVL"),
        "ISNULL" => Some("NVL"),
        "COALESCE" => None, // Both work
        _ => None,
    }
}

/// Remap functions for BigQuery dialect.
pub fn remap_function_bigquery(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "STRFTIME" => Some("FORMAT_TIMESTAMP"),
        "TO_CHAR" => Some("FORMAT_TIMESTAMP"),
        "DATE_FORMAT" => Some("FORMAT_TIMESTAMP"),
        "NVL" => Some("IFNULL"),
        "ISNULL" => Some("IFNULL"),
        "LENGTH" => Some("CHAR_LENGTH"),
        _ => None,
    }
}

/// Remap functions for Redshift dialect.
/// Redshift is Postgres-based, so we delegate to Postgres remapping.
pub fn remap_function_redshift(name: &str) -> Option<&'static str> {
    remap_function_postgres(name)
}

/// Remap functions for Databricks (Spark SQL) dialect.
pub fn remap_function_databricks(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "TO_CHAR" => Some("DATE_FORMAT"),
        "STRFTIME" => Some("DATE_FORMAT"),
        "NVL" => Some("COALESCE"),
        "ISNULL" => Some("COALESCE"),
        "IFNULL" => Some("COALESCE"),
        _ => None,
    }
}

// =============================================================================
// Data Type Emission
// =============================================================================

use crate::model::DataType;

/// CAST type names for ANSI/Postgres style.
pub fn emit_data_type_ansi(dt: &DataType) -> String {
    match dt {
        DataType::Bool => "BOOLEAN".into(),
        DataType::Int => "BIGINT".into(),
        DataType::Float => "DOUBLE PRECISION".into(),
        DataType::Numeric => "NUMERIC".into(),
        DataType::String => "TEXT".into(),
        DataType::Date => "DATE".into(),
        DataType::Datetime => "TIMESTAMP".into(),
        DataType::Timestamp => "TIMESTAMPTZ".into(),
        DataType::Array | DataType::Map | DataType::Struct => "JSONB".into(),
    }
}

/// CAST type names for DuckDB.
pub fn emit_data_type_duckdb(dt: &DataType) -> String {
    match dt {
        DataType::Bool => "BOOLEAN".into(),
        DataType::Int => "BIGINT".into(),
        DataType::Float => "DOUBLE".into(),
        DataType::Numeric => "DECIMAL(38, 9)".into(),
        DataType::String => "VARCHAR".into(),
        DataType::Date => "DATE".into(),
        DataType::Datetime => "TIMESTAMP".into(),
        DataType::Timestamp => "TIMESTAMPTZ".into(),
        DataType::Array | DataType::Map | DataType::Struct => "JSON".into(),
    }
}

/// CAST type names for Redshift.
pub fn emit_data_type_redshift(dt: &DataType) -> String {
    match dt {
        DataType::Float => "DOUBLE PRECISION".into(),
        DataType::Numeric => "DECIMAL(38, 9)".into(),
        DataType::String => "VARCHAR".into(),
        DataType::Array | DataType::Map | DataType::Struct => "SUPER".into(),
        other => emit_data_type_ansi(other),
    }
}

/// CAST type names for MySQL.
///
/// MySQL's CAST accepts a restricted set of target types.
pub fn emit_data_type_mysql(dt: &DataType) -> String {
    match dt {
        DataType::Bool | DataType::Int => "SIGNED".into(),
        DataType::Float => "DOUBLE".into(),
        DataType::Numeric => "DECIMAL(38, 9)".into(),
        DataType::String => "CHAR".into(),
        DataType::Date => "DATE".into(),
        DataType::Datetime | DataType::Timestamp => "DATETIME".into(),
        DataType::Array | DataType::Map | DataType::Struct => "JSON".into(),
    }
}

/// CAST type names for T-SQL.
pub fn emit_data_type_tsql(dt: &DataType) -> String {
    match dt {
        DataType::Bool => "BIT".into(),
        DataType::Int => "BIGINT".into(),
        DataType::Float => "FLOAT".into(),
        DataType::Numeric => "DECIMAL(38, 9)".into(),
        DataType::String => "NVARCHAR(MAX)".into(),
        DataType::Date => "DATE".into(),
        DataType::Datetime => "DATETIME2".into(),
        DataType::Timestamp => "DATETIMEOFFSET".into(),
        DataType::Array | DataType::Map | DataType::Struct => "NVARCHAR(MAX)".into(),
    }
}

/// CAST type names for Snowflake.
pub fn emit_data_type_snowflake(dt: &DataType) -> String {
    match dt {
        DataType::Bool => "BOOLEAN".into(),
        DataType::Int => "BIGINT".into(),
        DataType::Float => "DOUBLE".into(),
        DataType::Numeric => "NUMBER(38, 9)".into(),
        DataType::String => "VARCHAR".into(),
        DataType::Date => "DATE".into(),
        DataType::Datetime => "TIMESTAMP_NTZ".into(),
        DataType::Timestamp => "TIMESTAMP_TZ".into(),
        DataType::Array => "ARRAY".into(),
        DataType::Map | DataType::Struct => "OBJECT".into(),
    }
}

/// CAST type names for BigQuery.
pub fn emit_data_type_bigquery(dt: &DataType) -> String {
    match dt {
        DataType::Bool => "BOOL".into(),
        DataType::Int => "INT64".into(),
        DataType::Float => "FLOAT64".into(),
        DataType::Numeric => "NUMERIC".into(),
        DataType::String => "STRING".into(),
        DataType::Date => "DATE".into(),
        DataType::Datetime => "DATETIME".into(),
        DataType::Timestamp => "TIMESTAMP".into(),
        DataType::Array | DataType::Map | DataType::Struct => "JSON".into(),
    }
}

/// CAST type names for Databricks (Spark SQL).
pub fn emit_data_type_databricks(dt: &DataType) -> String {
    match dt {
        DataType::Bool => "BOOLEAN".into(),
        DataType::Int => "BIGINT".into(),
        DataType::Float => "DOUBLE".into(),
        DataType::Numeric => "DECIMAL(38, 9)".into(),
        DataType::String => "STRING".into(),
        DataType::Date => "DATE".into(),
        DataType::Datetime => "TIMESTAMP_NTZ".into(),
        DataType::Timestamp => "TIMESTAMP".into(),
        DataType::Array | DataType::Map | DataType::Struct => "STRING".into(),
    }
}
