//! End-to-end compilation from source text to SQL.
//!
//! ```text
//! root source → load (parse + imports) → bind → Model → plan queries → SQL
//! ```
//!
//! # Example
//!
//! ```ignore
//! use quarry::compile::{compile, CompileOptions};
//! use quarry::semantic::InMemoryResolver;
//! use quarry::sql::Dialect;
//!
//! let resolver = InMemoryResolver::new().with("customer", CUSTOMER_SOURCE);
//! let options = CompileOptions::default().with_dialect(Dialect::Postgres);
//! let output = compile("orders", ORDER_SOURCE, &resolver, &options)?;
//! for query in &output.queries {
//!     println!("{}", query.sql);
//! }
//! ```

use std::sync::Arc;

use crate::dsl::{self, Diagnostic, Statement};
use crate::model::Model;
use crate::planner::{plan_query, CompiledQuery, PlanError, PlannerOptions};
use crate::semantic::{self, BindError, LoadError, SourceResolver};
use crate::sql::Dialect;

/// File label used in diagnostics for ad-hoc query text.
pub const QUERY_FILE: &str = "<query>";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during compilation.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Lex or parse errors, collected across every loaded file.
    #[error("{} syntax error(s)", .0.len())]
    Diagnostics(Vec<Diagnostic>),

    #[error(transparent)]
    Bind(#[from] BindError),

    /// Planning failed for a query written in `file`.
    #[error("{source}")]
    Plan { file: String, source: PlanError },
}

impl CompileError {
    /// Every error as a diagnostic the UI can underline.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            CompileError::Diagnostics(diags) => diags.clone(),
            CompileError::Bind(e) => vec![e.to_diagnostic()],
            CompileError::Plan { file, source } => vec![source.to_diagnostic(file)],
        }
    }
}

impl From<LoadError> for CompileError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Syntax(diags) => CompileError::Diagnostics(diags),
            LoadError::Bind(e) => CompileError::Bind(e),
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

// ============================================================================
// Options
// ============================================================================

/// Options for compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// SQL dialect to generate.
    pub dialect: Dialect,
    pub planner: PlannerOptions,
}

impl CompileOptions {
    /// Set the SQL dialect.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_planner(mut self, planner: PlannerOptions) -> Self {
        self.planner = planner;
        self
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// A bound model and the compiled queries of its root file.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub model: Arc<Model>,
    /// One entry per query statement in the root file, in source order.
    pub queries: Vec<CompiledQuery>,
}

// ============================================================================
// Compilation Functions
// ============================================================================

/// Load, bind and compile every query in the root file.
pub fn compile(
    root_path: &str,
    source: &str,
    resolver: &dyn SourceResolver,
    options: &CompileOptions,
) -> CompileResult<CompileOutput> {
    let model = load_model(root_path, source, resolver)?;
    let queries = compile_model(&model, options)?;
    Ok(CompileOutput { model, queries })
}

/// Load and bind a model without planning its queries.
pub fn load_model(
    root_path: &str,
    source: &str,
    resolver: &dyn SourceResolver,
) -> CompileResult<Arc<Model>> {
    let model = semantic::load_and_bind(root_path, source, resolver)?;
    log::debug!(root = root_path, files = model.files().len(); "Loaded model");
    Ok(Arc::new(model))
}

/// Compile the query statements of the root file of a bound model.
pub fn compile_model(model: &Model, options: &CompileOptions) -> CompileResult<Vec<CompiledQuery>> {
    let root = model.file(model.root());
    root.queries
        .iter()
        .map(|stmt| {
            plan_query(model, &stmt.value, root.id, options.dialect, &options.planner).map_err(
                |source| CompileError::Plan {
                    file: root.path.clone(),
                    source,
                },
            )
        })
        .collect()
}

/// Compile ad-hoc query text against an existing model.
///
/// Names resolve in the root file's scope. The text must hold exactly one
/// query; declarations are rejected because they would change the model.
pub fn compile_query(
    model: &Model,
    text: &str,
    options: &CompileOptions,
) -> CompileResult<CompiledQuery> {
    let parsed = dsl::parse(text);
    if parsed.has_errors() {
        return Err(CompileError::Diagnostics(
            parsed
                .diagnostics
                .into_iter()
                .map(|d| d.with_file(QUERY_FILE))
                .collect(),
        ));
    }
    let script = parsed.script.unwrap_or_default();

    let mut rejected = Vec::new();
    let mut queries = Vec::new();
    for stmt in &script.statements {
        match &stmt.value {
            Statement::Query(query) => queries.push(query),
            _ => rejected.push(
                Diagnostic::error(
                    stmt.span.clone(),
                    "declarations cannot be added to a bound model; re-bind to change it",
                )
                .with_file(QUERY_FILE),
            ),
        }
    }
    if queries.len() != 1 {
        let span = script
            .statements
            .get(1)
            .map(|s| s.span.clone())
            .unwrap_or(0..text.len());
        rejected.push(
            Diagnostic::error(
                span,
                format!("expected exactly one query, found {}", queries.len()),
            )
            .with_file(QUERY_FILE),
        );
    }
    if !rejected.is_empty() {
        return Err(CompileError::Diagnostics(rejected));
    }

    plan_query(
        model,
        queries[0],
        model.root(),
        options.dialect,
        &options.planner,
    )
    .map_err(|source| CompileError::Plan {
        file: QUERY_FILE.to_string(),
        source,
    })
}
