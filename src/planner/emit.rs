//! Bound expression to SQL expression conversion.

use std::collections::{BTreeSet, HashMap};

use super::resolve::BoundExpr;
use super::sources::SourcePlan;
use super::{PlanError, PlanResult};
use crate::dsl::ast::{AggregateFunc, BinaryOp, Literal, UnaryOp};
use crate::dsl::Span;
use crate::model::{ConceptId, DatasourceId, Model};
use crate::sql::expr::{
    count_distinct, count_star, func, over, table_col, BinaryOperator as SqlBinaryOp,
    Expr as SqlExpr, Literal as SqlLiteral, UnaryOperator as SqlUnaryOp,
};

/// Table aliases and concept columns for one query.
pub struct QueryContext {
    table_aliases: HashMap<DatasourceId, String>,
    /// Concept -> (table alias, column), first supplying datasource wins.
    columns: HashMap<ConceptId, (String, String)>,
}

impl QueryContext {
    pub fn new(model: &Model, plan: Option<&SourcePlan>) -> Self {
        let mut context = Self {
            table_aliases: HashMap::new(),
            columns: HashMap::new(),
        };
        let Some(plan) = plan else {
            return context;
        };

        let mut taken: HashMap<String, usize> = HashMap::new();
        for id in plan.datasources() {
            let ds = model.datasource(id);
            let count = taken.entry(ds.name.clone()).or_insert(0);
            *count += 1;
            let alias = if *count == 1 {
                ds.name.clone()
            } else {
                format!("{}_{}", ds.name, count)
            };
            for binding in &ds.columns {
                context
                    .columns
                    .entry(binding.concept)
                    .or_insert_with(|| (alias.clone(), binding.column.clone()));
            }
            context.table_aliases.insert(id, alias);
        }
        context
    }

    pub fn table_alias(&self, id: DatasourceId) -> Option<&str> {
        self.table_aliases.get(&id).map(|s| s.as_str())
    }

    /// Qualified column reading a concept.
    pub fn column(&self, model: &Model, concept: ConceptId) -> PlanResult<SqlExpr> {
        self.columns
            .get(&concept)
            .map(|(table, column)| table_col(table, column))
            .ok_or_else(|| PlanError::NoDatasourceForConcept {
                concept: model.describe(concept),
                span: Span::default(),
            })
    }
}

/// How `by` aggregates render, fixed per query.
pub struct AggregateScope<'a> {
    /// Whether the query has a GROUP BY.
    pub grouped: bool,
    /// Keys of the non-aggregated select items.
    pub grain: &'a BTreeSet<ConceptId>,
}

/// Converts bound expressions to SQL for one query.
pub struct ExprConverter<'a> {
    model: &'a Model,
    context: &'a QueryContext,
    scope: AggregateScope<'a>,
}

impl<'a> ExprConverter<'a> {
    pub fn new(model: &'a Model, context: &'a QueryContext, scope: AggregateScope<'a>) -> Self {
        Self {
            model,
            context,
            scope,
        }
    }

    /// Convert an expression; `span` locates errors.
    pub fn convert(&self, expr: &BoundExpr, span: &Span) -> PlanResult<SqlExpr> {
        match expr {
            BoundExpr::Column(id) => self.context.column(self.model, *id),
            BoundExpr::Literal(lit) => Ok(SqlExpr::Literal(convert_literal(lit))),
            BoundExpr::Unary { op, expr } => Ok(SqlExpr::UnaryOp {
                op: convert_unary_op(*op),
                expr: Box::new(self.convert(expr, span)?.nested()),
            }),
            BoundExpr::Binary { left, op, right } => Ok(SqlExpr::BinaryOp {
                left: Box::new(self.convert(left, span)?.nested()),
                op: convert_binary_op(*op),
                right: Box::new(self.convert(right, span)?.nested()),
            }),
            BoundExpr::Function { name, args } => {
                let args = args
                    .iter()
                    .map(|a| self.convert(a, span))
                    .collect::<PlanResult<Vec<_>>>()?;
                Ok(func(name, args))
            }
            BoundExpr::Aggregate { func, arg, by } => {
                let arg = match arg {
                    Some(arg) => Some(self.convert(arg, span)?),
                    None => None,
                };
                self.aggregate(*func, arg, by, span)
            }
            BoundExpr::Cast { expr, data_type } => Ok(SqlExpr::Cast {
                expr: Box::new(self.convert(expr, span)?),
                data_type: *data_type,
            }),
            BoundExpr::IsNull { expr, negated } => Ok(SqlExpr::IsNull {
                expr: Box::new(self.convert(expr, span)?.nested()),
                negated: *negated,
            }),
            BoundExpr::InList {
                expr,
                values,
                negated,
            } => Ok(SqlExpr::In {
                expr: Box::new(self.convert(expr, span)?.nested()),
                values: values
                    .iter()
                    .map(|v| self.convert(v, span))
                    .collect::<PlanResult<Vec<_>>>()?,
                negated: *negated,
            }),
        }
    }

    fn aggregate(
        &self,
        agg: AggregateFunc,
        arg: Option<SqlExpr>,
        by: &[ConceptId],
        span: &Span,
    ) -> PlanResult<SqlExpr> {
        let call = aggregate_call(agg, arg, span)?;
        if by.is_empty() {
            return Ok(call);
        }

        let partition = by
            .iter()
            .map(|c| self.context.column(self.model, *c))
            .collect::<PlanResult<Vec<_>>>()?;

        // Ungrouped: each row carries the aggregate over its partition
        if !self.scope.grouped {
            return Ok(over(call, partition));
        }

        let by_keys = self.grain_of(by);
        if &by_keys == self.scope.grain {
            return Ok(call);
        }
        if !by_keys.is_subset(self.scope.grain) {
            return Err(PlanError::unsupported(
                "`by` concepts must be part of the query's grouping grain",
                span,
            ));
        }

        // Coarser than the GROUP BY: re-aggregate the group results
        let outer = match agg {
            AggregateFunc::Sum | AggregateFunc::Count => "SUM",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Avg | AggregateFunc::CountDistinct => {
                return Err(PlanError::unsupported(
                    format!("`{}` cannot be re-aggregated over a coarser grain", agg),
                    span,
                ))
            }
        };
        Ok(over(func(outer, vec![call]), partition))
    }

    fn grain_of(&self, by: &[ConceptId]) -> BTreeSet<ConceptId> {
        super::key_grain(self.model, by.iter().copied())
    }
}

fn aggregate_call(agg: AggregateFunc, arg: Option<SqlExpr>, span: &Span) -> PlanResult<SqlExpr> {
    match (agg, arg) {
        (AggregateFunc::Count, None) => Ok(count_star()),
        (AggregateFunc::CountDistinct, Some(arg)) => Ok(count_distinct(arg)),
        (_, Some(arg)) => Ok(func(aggregate_name(agg), vec![arg])),
        (_, None) => Err(PlanError::unsupported(
            format!("`{}` needs an argument", agg),
            span,
        )),
    }
}

fn aggregate_name(agg: AggregateFunc) -> &'static str {
    match agg {
        AggregateFunc::Sum => "SUM",
        AggregateFunc::Avg => "AVG",
        AggregateFunc::Min => "MIN",
        AggregateFunc::Max => "MAX",
        AggregateFunc::Count | AggregateFunc::CountDistinct => "COUNT",
    }
}

fn convert_literal(lit: &Literal) -> SqlLiteral {
    match lit {
        Literal::Int(n) => SqlLiteral::Int(*n),
        Literal::Float(f) => SqlLiteral::Float(*f),
        Literal::String(s) => SqlLiteral::String(s.clone()),
        Literal::Bool(b) => SqlLiteral::Bool(*b),
        Literal::Null => SqlLiteral::Null,
    }
}

fn convert_unary_op(op: UnaryOp) -> SqlUnaryOp {
    match op {
        UnaryOp::Not => SqlUnaryOp::Not,
        UnaryOp::Neg => SqlUnaryOp::Minus,
    }
}

fn convert_binary_op(op: BinaryOp) -> SqlBinaryOp {
    match op {
        BinaryOp::Or => SqlBinaryOp::Or,
        BinaryOp::And => SqlBinaryOp::And,
        BinaryOp::Eq => SqlBinaryOp::Eq,
        BinaryOp::Ne => SqlBinaryOp::Ne,
        BinaryOp::Lt => SqlBinaryOp::Lt,
        BinaryOp::Lte => SqlBinaryOp::Lte,
        BinaryOp::Gt => SqlBinaryOp::Gt,
        BinaryOp::Gte => SqlBinaryOp::Gte,
        BinaryOp::Like => SqlBinaryOp::Like,
        BinaryOp::NotLike => SqlBinaryOp::NotLike,
        BinaryOp::Add => SqlBinaryOp::Plus,
        BinaryOp::Sub => SqlBinaryOp::Minus,
        BinaryOp::Mul => SqlBinaryOp::Mul,
        BinaryOp::Div => SqlBinaryOp::Div,
        BinaryOp::Mod => SqlBinaryOp::Mod,
    }
}

/// Whether a window function appears anywhere in the expression.
pub fn contains_window(expr: &SqlExpr) -> bool {
    match expr {
        SqlExpr::WindowFunction { .. } => true,
        SqlExpr::Column { .. } | SqlExpr::Literal(_) | SqlExpr::Star => false,
        SqlExpr::BinaryOp { left, right, .. } => contains_window(left) || contains_window(right),
        SqlExpr::UnaryOp { expr, .. }
        | SqlExpr::IsNull { expr, .. }
        | SqlExpr::Cast { expr, .. }
        | SqlExpr::Paren(expr) => contains_window(expr),
        SqlExpr::Function { args, .. } => args.iter().any(contains_window),
        SqlExpr::In { expr, values, .. } => {
            contains_window(expr) || values.iter().any(contains_window)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Dialect;

    #[test]
    fn test_operator_mapping() {
        assert_eq!(convert_binary_op(BinaryOp::Add), SqlBinaryOp::Plus);
        assert_eq!(convert_binary_op(BinaryOp::NotLike), SqlBinaryOp::NotLike);
        assert_eq!(convert_unary_op(UnaryOp::Neg), SqlUnaryOp::Minus);
    }

    #[test]
    fn test_aggregate_call() {
        let x = table_col("orders", "o_total");
        let sum = aggregate_call(AggregateFunc::Sum, Some(x.clone()), &(0..0)).unwrap();
        assert_eq!(sum.to_sql(Dialect::DuckDb), "SUM(\"orders\".\"o_total\")");

        let distinct = aggregate_call(AggregateFunc::CountDistinct, Some(x), &(0..0)).unwrap();
        assert_eq!(
            distinct.to_sql(Dialect::DuckDb),
            "COUNT(DISTINCT \"orders\".\"o_total\")"
        );

        let star = aggregate_call(AggregateFunc::Count, None, &(0..0)).unwrap();
        assert_eq!(star.to_sql(Dialect::DuckDb), "COUNT(*)");

        assert!(aggregate_call(AggregateFunc::CountDistinct, None, &(0..0)).is_err());
    }

    #[test]
    fn test_contains_window() {
        let col = table_col("t", "x");
        assert!(!contains_window(&func("SUM", vec![col.clone()])));
        let windowed = over(func("SUM", vec![col.clone()]), vec![col]);
        assert!(contains_window(&SqlExpr::Paren(Box::new(windowed))));
    }
}
