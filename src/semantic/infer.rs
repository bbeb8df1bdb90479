//! Expression type inference.

use crate::dsl::ast::{AggregateFunc, BinaryOp, ConceptPath, Expr, Literal, UnaryOp};
use crate::model::DataType;

/// Infer the result type of an expression.
///
/// `concept_type` supplies the type of each referenced concept. Returns
/// `None` when the type cannot be determined (unknown functions, untyped
/// concepts, bare `null`).
pub fn infer_type(
    expr: &Expr,
    concept_type: &mut dyn FnMut(&ConceptPath) -> Option<DataType>,
) -> Option<DataType> {
    match expr {
        Expr::Concept(path) => concept_type(path),
        Expr::Literal(lit) => literal_type(lit),
        Expr::Unary { op: UnaryOp::Not, .. } => Some(DataType::Bool),
        Expr::Unary { op: UnaryOp::Neg, expr } => infer_type(&expr.value, concept_type),
        Expr::Binary { left, op, right } => {
            if op.is_comparison() || op.is_logical() {
                return Some(DataType::Bool);
            }
            let l = infer_type(&left.value, concept_type);
            let r = infer_type(&right.value, concept_type);
            match (l, r) {
                (Some(a), Some(b)) if a.is_numeric() && b.is_numeric() => Some(a.widen(b)),
                (Some(a), _) => Some(a),
                (None, b) => b,
            }
        }
        Expr::Function { name, args } => {
            let first = args
                .first()
                .and_then(|a| infer_type(&a.value, concept_type));
            match name.to_ascii_lowercase().as_str() {
                "upper" | "lower" | "trim" | "concat" | "substr" | "substring" | "replace" => {
                    Some(DataType::String)
                }
                "length" | "len" | "year" | "month" | "day" => Some(DataType::Int),
                "abs" | "round" | "floor" | "ceil" | "coalesce" | "nullif" => first,
                "current_date" => Some(DataType::Date),
                "now" | "current_timestamp" => Some(DataType::Timestamp),
                _ => None,
            }
        }
        Expr::Aggregate { func, arg, .. } => match func {
            AggregateFunc::Count | AggregateFunc::CountDistinct => Some(DataType::Int),
            AggregateFunc::Avg => Some(DataType::Float),
            AggregateFunc::Sum | AggregateFunc::Min | AggregateFunc::Max => arg
                .as_ref()
                .and_then(|a| infer_type(&a.value, concept_type)),
        },
        Expr::Cast { data_type, .. } => Some(*data_type),
        Expr::IsNull { .. } | Expr::InList { .. } => Some(DataType::Bool),
    }
}

pub fn literal_type(lit: &Literal) -> Option<DataType> {
    match lit {
        Literal::Int(_) => Some(DataType::Int),
        Literal::Float(_) => Some(DataType::Float),
        Literal::String(_) => Some(DataType::String),
        Literal::Bool(_) => Some(DataType::Bool),
        Literal::Null => None,
    }
}
