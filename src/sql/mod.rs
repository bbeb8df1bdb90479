//! SQL generation.
//!
//! A small, type-safe SELECT builder that renders to every supported
//! dialect:
//!
//! - [`query`] - SELECT query builder
//! - [`expr`] - expression AST and builder functions
//! - [`token`] - tokens, the unit of dialect-specific rendering
//! - [`dialect`] - dialect implementations

pub mod dialect;
pub mod expr;
pub mod query;
pub mod token;

pub mod test_utils;

pub use dialect::{Dialect, SqlDialect, UnknownDialect};
pub use expr::{
    cast, col, count_distinct, count_star, func, lit_bool, lit_float, lit_int, lit_null, lit_str,
    over, table_col, BinaryOperator, Expr, ExprExt, Literal, UnaryOperator,
};
pub use query::{
    Join, JoinType, NullsOrder, OrderByExpr, Query, SelectExpr, SortDir, TableRef, TableSource,
};
pub use token::{Token, TokenStream};
