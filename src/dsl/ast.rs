//! Abstract syntax tree for Quarry source files.
//!
//! A file is a flat list of `;`-terminated statements. Names inside
//! expressions stay as dotted paths; the binder resolves them.

use std::fmt;

use super::span::{Span, Spanned};
use crate::model::DataType;

/// A parsed source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub statements: Vec<Spanned<Statement>>,
}

impl Script {
    pub fn imports(&self) -> impl Iterator<Item = &ImportStmt> {
        self.statements.iter().filter_map(|s| match &s.value {
            Statement::Import(i) => Some(i),
            _ => None,
        })
    }

    pub fn concepts(&self) -> impl Iterator<Item = &ConceptDecl> {
        self.statements.iter().filter_map(|s| match &s.value {
            Statement::Concept(c) => Some(c),
            _ => None,
        })
    }

    pub fn datasources(&self) -> impl Iterator<Item = &DatasourceDecl> {
        self.statements.iter().filter_map(|s| match &s.value {
            Statement::Datasource(d) => Some(d),
            _ => None,
        })
    }

    /// Query statements with their spans.
    pub fn queries(&self) -> impl Iterator<Item = Spanned<&QueryStmt>> {
        self.statements.iter().filter_map(|s| match &s.value {
            Statement::Query(q) => Some(Spanned::new(q, s.span.clone())),
            _ => None,
        })
    }
}

/// A top-level statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Import(ImportStmt),
    Concept(ConceptDecl),
    Datasource(DatasourceDecl),
    Query(QueryStmt),
}

/// `import path as alias;`
#[derive(Debug, Clone, PartialEq)]
pub struct ImportStmt {
    pub path: Spanned<String>,
    /// Explicit alias, or the last path segment.
    pub alias: Spanned<String>,
}

/// A dotted concept path such as `orders.customer.id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConceptPath {
    pub segments: Vec<String>,
}

impl ConceptPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    pub fn single(name: &str) -> Self {
        Self {
            segments: vec![name.to_string()],
        }
    }

    /// Last segment; the concept's local name.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// Segments joined with `_`, used for default output names.
    pub fn underscored(&self) -> String {
        self.segments.join("_")
    }
}

impl fmt::Display for ConceptPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConceptKind {
    Key,
    Property,
    Metric,
    Auto,
}

impl fmt::Display for ConceptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConceptKind::Key => write!(f, "key"),
            ConceptKind::Property => write!(f, "property"),
            ConceptKind::Metric => write!(f, "metric"),
            ConceptKind::Auto => write!(f, "auto"),
        }
    }
}

/// Owner clause of a property or metric.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnerRef {
    /// `property customer.id.name`
    Single(Spanned<ConceptPath>),
    /// `property <part.id, supplier.id>.qty`
    Composite(Vec<Spanned<ConceptPath>>),
}

/// `key|property|metric|auto ... ;`
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptDecl {
    pub kind: ConceptKind,
    pub owner: Option<OwnerRef>,
    pub name: Spanned<String>,
    pub data_type: Option<Spanned<DataType>>,
    pub derivation: Option<Spanned<Expr>>,
}

/// `datasource name (col: concept, ...) grain (...) address ...;`
#[derive(Debug, Clone, PartialEq)]
pub struct DatasourceDecl {
    pub name: Spanned<String>,
    pub columns: Vec<ColumnMapping>,
    pub grain: Option<Vec<Spanned<ConceptPath>>>,
    pub address: Spanned<AddressRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub column: Spanned<String>,
    pub concept: Spanned<ConceptPath>,
}

/// Where a datasource's rows live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressRef {
    /// `address tpch.orders`
    Table(Vec<String>),
    /// `address 'data/orders.parquet'`
    File(String),
    /// ``address `project.dataset.orders` ``
    Quoted(String),
}

/// A `select` statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStmt {
    pub selects: Vec<SelectItem>,
    pub where_clause: Option<Spanned<Expr>>,
    pub having: Option<Spanned<Expr>>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<Spanned<u64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Spanned<Expr>,
    pub alias: Option<Spanned<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Spanned<Expr>,
    pub direction: SortDirection,
    pub nulls: Option<NullsPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsPosition {
    First,
    Last,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Concept(ConceptPath),
    Literal(Literal),
    Unary {
        op: UnaryOp,
        expr: Box<Spanned<Expr>>,
    },
    Binary {
        left: Box<Spanned<Expr>>,
        op: BinaryOp,
        right: Box<Spanned<Expr>>,
    },
    /// Scalar function call passed through to SQL.
    Function {
        name: String,
        args: Vec<Spanned<Expr>>,
    },
    /// `sum(x) by a.id`; `arg` is `None` for `count(*)`.
    Aggregate {
        func: AggregateFunc,
        arg: Option<Box<Spanned<Expr>>>,
        by: Vec<Spanned<ConceptPath>>,
    },
    Cast {
        expr: Box<Spanned<Expr>>,
        data_type: DataType,
    },
    IsNull {
        expr: Box<Spanned<Expr>>,
        negated: bool,
    },
    InList {
        expr: Box<Spanned<Expr>>,
        values: Vec<Spanned<Expr>>,
        negated: bool,
    },
}

impl Expr {
    /// Whether an aggregate appears anywhere in the expression tree.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Concept(_) | Expr::Literal(_) => false,
            Expr::Unary { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::IsNull { expr, .. } => expr.contains_aggregate(),
            Expr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::Function { args, .. } => args.iter().any(|a| a.contains_aggregate()),
            Expr::InList { expr, values, .. } => {
                expr.contains_aggregate() || values.iter().any(|v| v.contains_aggregate())
            }
        }
    }
}

impl Spanned<Expr> {
    /// Visit every concept path in the expression with its span, including
    /// `by` paths.
    pub fn visit_concepts<'a>(&'a self, f: &mut impl FnMut(&'a ConceptPath, &'a Span)) {
        match &self.value {
            Expr::Concept(path) => f(path, &self.span),
            Expr::Literal(_) => {}
            Expr::Unary { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::IsNull { expr, .. } => expr.visit_concepts(f),
            Expr::Binary { left, right, .. } => {
                left.visit_concepts(f);
                right.visit_concepts(f);
            }
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.visit_concepts(f);
                }
            }
            Expr::Aggregate { arg, by, .. } => {
                if let Some(arg) = arg {
                    arg.visit_concepts(f);
                }
                for path in by {
                    f(&path.value, &path.span);
                }
            }
            Expr::InList { expr, values, .. } => {
                expr.visit_concepts(f);
                for v in values {
                    v.visit_concepts(f);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Lte
                | BinaryOp::Gt
                | BinaryOp::Gte
                | BinaryOp::Like
                | BinaryOp::NotLike
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunc {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    CountDistinct,
}

impl AggregateFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sum" => Some(AggregateFunc::Sum),
            "avg" => Some(AggregateFunc::Avg),
            "min" => Some(AggregateFunc::Min),
            "max" => Some(AggregateFunc::Max),
            "count" => Some(AggregateFunc::Count),
            "count_distinct" => Some(AggregateFunc::CountDistinct),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
            AggregateFunc::Count => "count",
            AggregateFunc::CountDistinct => "count_distinct",
        }
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
