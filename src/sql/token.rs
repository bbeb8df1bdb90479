//! SQL tokens - the atomic units of SQL output.
//!
//! Tokens are dialect-agnostic representations that serialize
//! to dialect-specific strings.

use super::dialect::{Dialect, SqlDialect};
use crate::model::DataType;

/// SQL token - every element the planner emits.
///
/// Adding a new variant here will cause compile errors everywhere
/// it needs to be handled (exhaustive matching).
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // === Keywords ===
    Select,
    Distinct,
    From,
    Where,
    And,
    Or,
    Not,
    As,
    On,
    Join,
    Inner,
    Left,
    Right,
    Full,
    Outer,
    GroupBy,
    Having,
    OrderBy,
    Asc,
    Desc,
    NullsFirst,
    NullsLast,
    Limit,
    Offset,
    Fetch,
    Next,
    Rows,
    Only,
    In,
    Like,
    IsNull,
    IsNotNull,
    Cast,
    Null,
    True,
    False,

    // === Window Keywords ===
    Over,
    PartitionBy,

    // === Punctuation ===
    Comma,
    Dot,
    Star,
    LParen,
    RParen,

    // === Operators ===
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,

    // === Whitespace / Formatting ===
    Space,
    Newline,
    Indent(usize),

    // === Dynamic Content ===
    /// Simple identifier (column, alias)
    Ident(String),
    /// Dotted identifier: `catalog.schema.table`, each part quoted
    QualifiedIdent(Vec<String>),
    LitInt(i64),
    LitFloat(f64),
    LitString(String),
    LitBool(bool),
    LitNull,
    /// Target type of a CAST, named per dialect
    DataType(DataType),

    /// Function name, remapped per dialect
    FunctionName(String),

    /// Pre-quoted SQL passed to the output unchanged.
    ///
    /// Only used for raw datasource addresses written by the model author.
    Raw(String),
}

impl Token {
    /// Serialize this token to a string for the given dialect.
    pub fn serialize(&self, dialect: Dialect) -> String {
        match self {
            // Keywords
            Token::Select => "SELECT".into(),
            Token::Distinct => "DISTINCT".into(),
            Token::From => "FROM".into(),
            Token::Where => "WHERE".into(),
            Token::And => "AND".into(),
            Token::Or => "OR".into(),
            Token::Not => "NOT".into(),
            Token::As => "AS".into(),
            Token::On => "ON".into(),
            Token::Join => "JOIN".into(),
            Token::Inner => "INNER".into(),
            Token::Left => "LEFT".into(),
            Token::Right => "RIGHT".into(),
            Token::Full => "FULL".into(),
            Token::Outer => "OUTER".into(),
            Token::GroupBy => "GROUP BY".into(),
            Token::Having => "HAVING".into(),
            Token::OrderBy => "ORDER BY".into(),
            Token::Asc => "ASC".into(),
            Token::Desc => "DESC".into(),
            Token::NullsFirst => "NULLS FIRST".into(),
            Token::NullsLast => "NULLS LAST".into(),
            Token::Limit => "LIMIT".into(),
            Token::Offset => "OFFSET".into(),
            Token::Fetch => "FETCH".into(),
            Token::Next => "NEXT".into(),
            Token::Rows => "ROWS".into(),
            Token::Only => "ONLY".into(),
            Token::In => "IN".into(),
            Token::Like => "LIKE".into(),
            Token::IsNull => "IS NULL".into(),
            Token::IsNotNull => "IS NOT NULL".into(),
            Token::Cast => "CAST".into(),
            Token::Null => "NULL".into(),
            Token::True => "TRUE".into(),
            Token::False => "FALSE".into(),

            // Window keywords
            Token::Over => "OVER".into(),
            Token::PartitionBy => "PARTITION BY".into(),

            // Punctuation
            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::Star => "*".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),

            // Operators
            Token::Eq => "=".into(),
            Token::Ne => "<>".into(),
            Token::Lt => "<".into(),
            Token::Gt => ">".into(),
            Token::Lte => "<=".into(),
            Token::Gte => ">=".into(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Mul => "*".into(),
            Token::Div => "/".into(),
            Token::Mod => "%".into(),

            // Whitespace
            Token::Space => " ".into(),
            Token::Newline => "\n".into(),
            Token::Indent(n) => "  ".repeat(*n),

            // Dynamic - dialect-specific formatting
            Token::Ident(name) => dialect.quote_identifier(name),
            Token::QualifiedIdent(parts) => parts
                .iter()
                .map(|p| dialect.quote_identifier(p))
                .collect::<Vec<_>>()
                .join("."),
            Token::LitInt(n) => n.to_string(),
            Token::LitFloat(f) => {
                // The DSL lexer rejects non-finite numbers; NULL keeps the
                // output valid if one is ever built programmatically
                if !f.is_finite() {
                    return "NULL".into();
                }
                let mut buffer = ryu::Buffer::new();
                buffer.format(*f).to_string()
            }
            Token::LitString(s) => dialect.quote_string(s),
            Token::LitBool(b) => dialect.format_bool(*b).into(),
            Token::LitNull => "NULL".into(),
            Token::DataType(dt) => dialect.emit_data_type(dt),

            Token::FunctionName(name) => match dialect.remap_function(name) {
                Some(remapped) => remapped.to_uppercase(),
                None => name.to_uppercase(),
            },

            Token::Raw(s) => s.clone(),
        }
    }
}

/// A stream of tokens that can be serialized to SQL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    pub fn new() -> Self {
        Self { tokens: vec![] }
    }

    pub fn push(&mut self, token: Token) -> &mut Self {
        self.tokens.push(token);
        self
    }

    /// Append another token stream.
    pub fn append(&mut self, other: &TokenStream) -> &mut Self {
        self.tokens.extend(other.tokens.iter().cloned());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Serialize all tokens to a SQL string.
    pub fn serialize(&self, dialect: Dialect) -> String {
        self.tokens.iter().map(|t| t.serialize(dialect)).collect()
    }

    // Convenience methods for common tokens
    pub fn space(&mut self) -> &mut Self {
        self.push(Token::Space)
    }
    pub fn newline(&mut self) -> &mut Self {
        self.push(Token::Newline)
    }
    pub fn indent(&mut self, n: usize) -> &mut Self {
        self.push(Token::Indent(n))
    }
    pub fn comma(&mut self) -> &mut Self {
        self.push(Token::Comma)
    }
    pub fn lparen(&mut self) -> &mut Self {
        self.push(Token::LParen)
    }
    pub fn rparen(&mut self) -> &mut Self {
        self.push(Token::RParen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_serialize() {
        assert_eq!(Token::Select.serialize(Dialect::DuckDb), "SELECT");
        assert_eq!(Token::GroupBy.serialize(Dialect::TSql), "GROUP BY");
        assert_eq!(Token::PartitionBy.serialize(Dialect::Postgres), "PARTITION BY");
    }

    #[test]
    fn test_ident_serialize() {
        let tok = Token::Ident("orders".into());
        assert_eq!(tok.serialize(Dialect::DuckDb), "\"orders\"");
        assert_eq!(tok.serialize(Dialect::TSql), "[orders]");
        assert_eq!(tok.serialize(Dialect::MySql), "`orders`");
    }

    #[test]
    fn test_qualified_ident() {
        let tok = Token::QualifiedIdent(vec!["tpch".into(), "orders".into()]);
        assert_eq!(tok.serialize(Dialect::TSql), "[tpch].[orders]");
        assert_eq!(tok.serialize(Dialect::DuckDb), "\"tpch\".\"orders\"");

        let tok = Token::QualifiedIdent(vec!["db".into(), "sales".into(), "orders".into()]);
        assert_eq!(tok.serialize(Dialect::BigQuery), "`db`.`sales`.`orders`");
    }

    #[test]
    fn test_token_stream() {
        let mut ts = TokenStream::new();
        ts.push(Token::Select)
            .space()
            .push(Token::Ident("name".into()))
            .space()
            .push(Token::From)
            .space()
            .push(Token::Ident("customers".into()));

        assert_eq!(
            ts.serialize(Dialect::Postgres),
            "SELECT \"name\" FROM \"customers\""
        );
    }

    #[test]
    fn test_data_type_per_dialect() {
        let tok = Token::DataType(DataType::String);
        assert_eq!(tok.serialize(Dialect::Postgres), "TEXT");
        assert_eq!(tok.serialize(Dialect::BigQuery), "STRING");
        assert_eq!(tok.serialize(Dialect::TSql), "NVARCHAR(MAX)");
    }

    #[test]
    fn test_float_serialize() {
        assert_eq!(Token::LitFloat(3.14).serialize(Dialect::DuckDb), "3.14");
        assert_eq!(Token::LitFloat(1.0).serialize(Dialect::DuckDb), "1.0");
        assert_eq!(Token::LitFloat(-42.5).serialize(Dialect::DuckDb), "-42.5");

        let large = Token::LitFloat(1234567890.123456).serialize(Dialect::DuckDb);
        assert!(large.starts_with("1234567890"), "Large float: {}", large);
    }

    #[test]
    fn test_non_finite_float_is_null() {
        assert_eq!(Token::LitFloat(f64::NAN).serialize(Dialect::DuckDb), "NULL");
        assert_eq!(
            Token::LitFloat(f64::INFINITY).serialize(Dialect::Postgres),
            "NULL"
        );
    }
}
