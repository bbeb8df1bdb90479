//! Errors raised while loading and binding model files.
//!
//! Every variant carries the path of the file it was found in and the
//! source span of the offending name, so callers can underline it.

use crate::dsl::{Diagnostic, Span};

/// Result type for binding operations.
pub type BindResult<T> = Result<T, BindError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindError {
    /// The resolver has no source for an imported path.
    #[error("cannot resolve import `{path}`")]
    UnresolvedImport {
        file: String,
        path: String,
        span: Span,
    },

    /// A name does not resolve to a concept in scope.
    #[error("unresolved concept reference `{name}`")]
    UnresolvedConceptReference {
        file: String,
        name: String,
        span: Span,
    },

    #[error("concept `{name}` is already declared in this file")]
    DuplicateConceptName {
        file: String,
        name: String,
        span: Span,
    },

    #[error("datasource `{name}` is already declared in this file")]
    DuplicateDatasourceName {
        file: String,
        name: String,
        span: Span,
    },

    #[error("namespace `{alias}` is already imported in this file")]
    DuplicateNamespace {
        file: String,
        alias: String,
        span: Span,
    },

    /// A property or metric owner is not a key.
    #[error("`{owner}` cannot own `{name}`: owners must be keys")]
    InvalidOwner {
        file: String,
        name: String,
        owner: String,
        span: Span,
    },

    /// A grain concept is absent from the datasource's column mapping.
    #[error("grain concept `{concept}` is not mapped by datasource `{datasource}`")]
    DatasourceGrainMismatch {
        file: String,
        datasource: String,
        concept: String,
        span: Span,
    },

    #[error("cyclic import: {}", cycle.join(" -> "))]
    CyclicImport {
        file: String,
        cycle: Vec<String>,
        span: Span,
    },
}

impl BindError {
    /// Path of the file the error points into.
    pub fn file(&self) -> &str {
        match self {
            BindError::UnresolvedImport { file, .. }
            | BindError::UnresolvedConceptReference { file, .. }
            | BindError::DuplicateConceptName { file, .. }
            | BindError::DuplicateDatasourceName { file, .. }
            | BindError::DuplicateNamespace { file, .. }
            | BindError::InvalidOwner { file, .. }
            | BindError::DatasourceGrainMismatch { file, .. }
            | BindError::CyclicImport { file, .. } => file,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            BindError::UnresolvedImport { span, .. }
            | BindError::UnresolvedConceptReference { span, .. }
            | BindError::DuplicateConceptName { span, .. }
            | BindError::DuplicateDatasourceName { span, .. }
            | BindError::DuplicateNamespace { span, .. }
            | BindError::InvalidOwner { span, .. }
            | BindError::DatasourceGrainMismatch { span, .. }
            | BindError::CyclicImport { span, .. } => span.clone(),
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.span(), self.to_string()).with_file(self.file())
    }
}
