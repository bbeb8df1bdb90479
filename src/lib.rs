//! # Quarry
//!
//! A semantic-model query language that compiles to multi-dialect SQL.
//!
//! ## Architecture
//!
//! Models declare *concepts* (keys, properties, metrics), bind them to
//! physical tables through *datasources*, and query them by name. The
//! compiler picks the datasources and joins:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │         Source files (concepts, datasources, queries)    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [dsl: lexer + parser]
//! ┌─────────────────────────────────────────────────────────┐
//! │                     AST per file                         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [semantic: loader + binder]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Model (concepts, joint keys, datasources,         │
//! │        import graph, datasource join graph)              │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [planner]
//! ┌─────────────────────────────────────────────────────────┐
//! │           SQL text + output schema per query             │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod compile;
pub mod config;
pub mod dsl;
pub mod model;
pub mod planner;
pub mod semantic;
pub mod sql;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::cache::QueryCache;
    pub use crate::compile::{
        compile, compile_model, compile_query, load_model, CompileError, CompileOptions,
        CompileOutput,
    };
    pub use crate::model::{DataType, Model, Purpose};
    pub use crate::planner::{CompiledQuery, OutputColumn, PlanError, PlannerOptions};
    pub use crate::semantic::{FsResolver, InMemoryResolver, SourceResolver};
    pub use crate::sql::{Dialect, JoinType};
}

pub use compile::{compile, compile_query, CompileError, CompileOptions};
pub use model::Model;
pub use sql::Dialect;
