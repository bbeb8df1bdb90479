//! Lexer, parser and AST for the Quarry modeling language.
//!
//! A Quarry file is a list of `;`-terminated statements:
//!
//! - **Imports**: `import customer;` or `import order as orders;`
//! - **Concepts**: `key`, `property`, `metric` and `auto` declarations
//! - **Datasources**: physical tables bound to concepts with a grain
//! - **Queries**: `select ... where ... having ... order by ... limit ...;`
//!
//! # Example
//!
//! ```ignore
//! use quarry::dsl;
//!
//! let result = dsl::parse(r#"
//!     key id int;
//!     property id.name string;
//!     datasource customers (c_custkey: id, c_name: name) grain (id) address tpch.customer;
//!     select id, name;
//! "#);
//! for diag in &result.diagnostics {
//!     eprintln!("{}", diag);
//! }
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod span;

pub use ast::*;
pub use lexer::LexError;
pub use parser::ParseError;
pub use span::{position_at, Position, Span, Spanned};

use serde::Serialize;

/// Result of parsing a source string.
#[derive(Debug)]
pub struct ParseResult {
    /// The parsed script. `None` only when lexing failed; after parse errors
    /// it holds the statements that parsed cleanly.
    pub script: Option<Script>,
    /// Diagnostic messages (errors and warnings).
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseResult {
    /// Returns true if parsing succeeded without errors.
    pub fn is_ok(&self) -> bool {
        self.script.is_some() && !self.has_errors()
    }

    /// Returns true if there are any errors.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Returns true if there are any warnings.
    pub fn has_warnings(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning)
    }

    /// Returns only the error diagnostics.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    /// Returns only the warning diagnostics.
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }
}

/// A diagnostic message with source location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Path of the file the span points into, when known.
    pub file: Option<String>,
    /// The span in the source where the diagnostic applies.
    pub span: Span,
    /// The severity level.
    pub severity: Severity,
    /// The diagnostic message.
    pub message: String,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Self {
            file: None,
            span,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    /// Create a new warning diagnostic.
    pub fn warning(span: Span, message: impl Into<String>) -> Self {
        Self {
            file: None,
            span,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A fatal error that prevents compilation.
    Error,
    /// A warning that doesn't prevent compilation.
    Warning,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.file {
            Some(file) => write!(f, "{}: {}: {} (at {:?})", file, level, self.message, self.span),
            None => write!(f, "{}: {} (at {:?})", level, self.message, self.span),
        }
    }
}

impl std::error::Error for Diagnostic {}

impl From<LexError> for Diagnostic {
    fn from(err: LexError) -> Self {
        Diagnostic::error(err.span.clone(), err.to_string())
    }
}

impl From<ParseError> for Diagnostic {
    fn from(err: ParseError) -> Self {
        Diagnostic::error(err.span.clone(), err.to_string())
    }
}

/// Parse a source string.
///
/// Lex errors stop before parsing; parse errors are collected one per
/// malformed statement and the rest of the file is still parsed.
pub fn parse(source: &str) -> ParseResult {
    // Step 1: Lexical analysis
    let tokens = match lexer::lex(source) {
        Ok(tokens) => tokens,
        Err(errors) => {
            log::debug!(errors = errors.len(); "Lexing failed");
            return ParseResult {
                script: None,
                diagnostics: errors.into_iter().map(Diagnostic::from).collect(),
            };
        }
    };

    // Step 2: Parsing
    let (script, errors) = parser::parse_tokens(&tokens, source.len());
    log::trace!(
        tokens = tokens.len(),
        statements = script.statements.len(),
        errors = errors.len();
        "Parsed source"
    );

    ParseResult {
        script: Some(script),
        diagnostics: errors.into_iter().map(Diagnostic::from).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_and_query() {
        let result = parse(
            r#"
            key id int;
            property id.name string;
            datasource customers (c_custkey: id, c_name: name) grain (id) address tpch.customer;
            select id, name;
        "#,
        );
        assert!(result.is_ok());
        let script = result.script.unwrap();
        assert_eq!(script.statements.len(), 4);
        assert_eq!(script.concepts().count(), 2);
        assert_eq!(script.datasources().count(), 1);
        assert_eq!(script.queries().count(), 1);
    }

    #[test]
    fn test_lex_error_has_no_script() {
        let result = parse("select 'unclosed;");
        assert!(result.script.is_none());
        assert!(result.has_errors());
        assert!(result.diagnostics[0].message.contains("1:8"));
    }

    #[test]
    fn test_parse_errors_keep_partial_script() {
        let result = parse("key id int;\nselect ;\nkey name string;\nselect , ;");
        assert_eq!(result.errors().count(), 2);
        let script = result.script.as_ref().unwrap();
        assert_eq!(script.concepts().count(), 2);
        assert!(!result.is_ok());
    }

    #[test]
    fn test_parse_result_helpers() {
        let result = ParseResult {
            script: Some(Script::default()),
            diagnostics: vec![Diagnostic::warning(0..1, "test warning")],
        };

        assert!(result.is_ok());
        assert!(!result.has_errors());
        assert!(result.has_warnings());
        assert_eq!(result.errors().count(), 0);
        assert_eq!(result.warnings().count(), 1);
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::error(10..20, "test error");
        let display = format!("{}", diag);
        assert!(display.contains("error"));
        assert!(display.contains("test error"));
        assert!(display.contains("10..20"));

        let with_file = diag.with_file("models/order.qry");
        assert!(with_file.to_string().starts_with("models/order.qry: error"));
    }
}
