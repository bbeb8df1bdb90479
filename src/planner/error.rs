//! Planning errors.

use crate::dsl::{Diagnostic, Span};
use crate::semantic::BindError;

/// Result type for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors that can occur while planning a query.
///
/// Spans point into the file the query was written in.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Bind(#[from] BindError),

    /// A concept is neither mapped by a datasource nor derived.
    #[error("concept `{concept}` is not mapped by any datasource and has no derivation")]
    NoDatasourceForConcept { concept: String, span: Span },

    #[error("cyclic derivation: {}", cycle.join(" -> "))]
    CyclicDerivation { cycle: Vec<String>, span: Span },

    #[error("no join path from `{from}` to a datasource supplying `{concept}`")]
    NoJoinPath {
        concept: String,
        from: String,
        span: Span,
    },

    /// Only raised with strict join paths enabled.
    #[error(
        "ambiguous join path to `{concept}`: {paths} equally short paths via {}",
        candidates.join(", ")
    )]
    AmbiguousJoinPath {
        concept: String,
        candidates: Vec<String>,
        paths: usize,
        span: Span,
    },

    #[error("unsupported aggregate: {reason}")]
    UnsupportedAggregateCombination { reason: String, span: Span },

    #[error("invalid ordering: {reason}")]
    InvalidOrdering { reason: String, span: Span },
}

impl PlanError {
    pub fn span(&self) -> Span {
        match self {
            PlanError::Bind(e) => e.span(),
            PlanError::NoDatasourceForConcept { span, .. }
            | PlanError::CyclicDerivation { span, .. }
            | PlanError::NoJoinPath { span, .. }
            | PlanError::AmbiguousJoinPath { span, .. }
            | PlanError::UnsupportedAggregateCombination { span, .. }
            | PlanError::InvalidOrdering { span, .. } => span.clone(),
        }
    }

    /// Convert to a diagnostic against the text the query was written in.
    pub fn to_diagnostic(&self, file: &str) -> Diagnostic {
        Diagnostic::error(self.span(), self.to_string()).with_file(file)
    }

    pub(crate) fn unsupported(reason: impl Into<String>, span: &Span) -> Self {
        PlanError::UnsupportedAggregateCombination {
            reason: reason.into(),
            span: span.clone(),
        }
    }
}
