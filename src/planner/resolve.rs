//! Name resolution for query expressions.
//!
//! Concept paths become either mapped columns or, for derived concepts, the
//! inlined derivation. The result no longer depends on file scopes.

use std::collections::{BTreeSet, HashMap};

use super::{PlanError, PlanResult};
use crate::dsl::ast::{AggregateFunc, BinaryOp, ConceptPath, Expr, Literal, UnaryOp};
use crate::dsl::{Span, Spanned};
use crate::model::{ConceptId, DataType, FileId, Model};
use crate::semantic::BindError;

/// An expression with every concept reference resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundExpr {
    /// A concept read from a datasource column.
    Column(ConceptId),
    Literal(Literal),
    Unary {
        op: UnaryOp,
        expr: Box<BoundExpr>,
    },
    Binary {
        left: Box<BoundExpr>,
        op: BinaryOp,
        right: Box<BoundExpr>,
    },
    Function {
        name: String,
        args: Vec<BoundExpr>,
    },
    /// `by` holds sorted, deduplicated grouping concepts.
    Aggregate {
        func: AggregateFunc,
        arg: Option<Box<BoundExpr>>,
        by: Vec<ConceptId>,
    },
    Cast {
        expr: Box<BoundExpr>,
        data_type: DataType,
    },
    IsNull {
        expr: Box<BoundExpr>,
        negated: bool,
    },
    InList {
        expr: Box<BoundExpr>,
        values: Vec<BoundExpr>,
        negated: bool,
    },
}

impl BoundExpr {
    fn children(&self) -> Vec<&BoundExpr> {
        match self {
            BoundExpr::Column(_) | BoundExpr::Literal(_) => vec![],
            BoundExpr::Unary { expr, .. }
            | BoundExpr::Cast { expr, .. }
            | BoundExpr::IsNull { expr, .. } => vec![&**expr],
            BoundExpr::Binary { left, right, .. } => vec![&**left, &**right],
            BoundExpr::Function { args, .. } => args.iter().collect(),
            BoundExpr::Aggregate { arg, .. } => arg.iter().map(|a| a.as_ref()).collect(),
            BoundExpr::InList { expr, values, .. } => {
                let mut out: Vec<&BoundExpr> = vec![&**expr];
                out.extend(values);
                out
            }
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        matches!(self, BoundExpr::Aggregate { .. })
            || self.children().into_iter().any(|c| c.contains_aggregate())
    }

    /// Whether an aggregate without `by` appears, making the query grouped.
    pub fn contains_plain_aggregate(&self) -> bool {
        match self {
            BoundExpr::Aggregate { by, .. } if by.is_empty() => true,
            _ => self
                .children()
                .into_iter()
                .any(|c| c.contains_plain_aggregate()),
        }
    }

    /// Every concept read, including `by` concepts.
    pub fn columns(&self, out: &mut BTreeSet<ConceptId>) {
        match self {
            BoundExpr::Column(id) => {
                out.insert(*id);
            }
            BoundExpr::Aggregate { arg, by, .. } => {
                if let Some(arg) = arg {
                    arg.columns(out);
                }
                out.extend(by.iter().copied());
            }
            _ => {
                for child in self.children() {
                    child.columns(out);
                }
            }
        }
    }

    /// Concepts read outside any aggregate.
    pub fn free_columns(&self, out: &mut BTreeSet<ConceptId>) {
        match self {
            BoundExpr::Column(id) => {
                out.insert(*id);
            }
            BoundExpr::Aggregate { .. } => {}
            _ => {
                for child in self.children() {
                    child.free_columns(out);
                }
            }
        }
    }

    /// `by` lists of every aggregate in the tree.
    pub fn grouping_sets(&self, out: &mut Vec<Vec<ConceptId>>) {
        if let BoundExpr::Aggregate { by, .. } = self {
            if !by.is_empty() {
                out.push(by.clone());
            }
        }
        for child in self.children() {
            child.grouping_sets(out);
        }
    }
}

/// Resolves query expressions against a model.
pub struct Resolver<'a> {
    model: &'a Model,
    /// Concepts whose derivations are being expanded.
    stack: Vec<ConceptId>,
    /// Span of the outermost reference, used for errors raised inside
    /// derivations declared in other files.
    anchor: Span,
    in_aggregate: bool,
    /// Select aliases visible to single-segment paths.
    aliases: HashMap<String, BoundExpr>,
}

impl<'a> Resolver<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self {
            model,
            stack: Vec::new(),
            anchor: Span::default(),
            in_aggregate: false,
            aliases: HashMap::new(),
        }
    }

    /// Make select aliases resolvable by bare name.
    pub fn set_aliases(&mut self, aliases: HashMap<String, BoundExpr>) {
        self.aliases = aliases;
    }

    pub fn clear_aliases(&mut self) {
        self.aliases.clear();
    }

    /// Resolve an expression written in `scope`.
    pub fn resolve(&mut self, expr: &Spanned<Expr>, scope: FileId) -> PlanResult<BoundExpr> {
        self.stack.clear();
        self.in_aggregate = false;
        self.anchor = expr.span.clone();
        self.bind(expr, scope)
    }

    /// Resolve a path to a concept id without expanding it.
    pub fn lookup(&self, scope: FileId, path: &ConceptPath, span: &Span) -> PlanResult<ConceptId> {
        self.model.lookup_concept(scope, path).ok_or_else(|| {
            PlanError::Bind(BindError::UnresolvedConceptReference {
                file: self.model.file(scope).path.clone(),
                name: path.to_string(),
                span: span.clone(),
            })
        })
    }

    fn error_span(&self, local: &Span) -> Span {
        if self.stack.is_empty() {
            local.clone()
        } else {
            self.anchor.clone()
        }
    }

    fn bind(&mut self, expr: &Spanned<Expr>, scope: FileId) -> PlanResult<BoundExpr> {
        match &expr.value {
            Expr::Concept(path) => {
                if let Some(bound) = self.alias(path, &expr.span)? {
                    return Ok(bound);
                }
                let id = self.lookup(scope, path, &expr.span)?;
                self.concept(id, &expr.span)
            }
            Expr::Literal(lit) => Ok(BoundExpr::Literal(lit.clone())),
            Expr::Unary { op, expr: inner } => Ok(BoundExpr::Unary {
                op: *op,
                expr: Box::new(self.bind(inner, scope)?),
            }),
            Expr::Binary { left, op, right } => Ok(BoundExpr::Binary {
                left: Box::new(self.bind(left, scope)?),
                op: *op,
                right: Box::new(self.bind(right, scope)?),
            }),
            Expr::Function { name, args } => Ok(BoundExpr::Function {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| self.bind(a, scope))
                    .collect::<PlanResult<_>>()?,
            }),
            Expr::Aggregate { func, arg, by } => {
                if self.in_aggregate {
                    return Err(PlanError::unsupported(
                        "aggregates cannot be nested",
                        &self.error_span(&expr.span),
                    ));
                }
                self.in_aggregate = true;
                let arg = match arg {
                    Some(arg) => Some(Box::new(self.bind(arg, scope)?)),
                    None => None,
                };
                self.in_aggregate = false;

                let mut keys = Vec::with_capacity(by.len());
                for path in by {
                    keys.push(self.grouping_concept(scope, path)?);
                }
                keys.sort();
                keys.dedup();

                Ok(BoundExpr::Aggregate {
                    func: *func,
                    arg,
                    by: keys,
                })
            }
            Expr::Cast {
                expr: inner,
                data_type,
            } => Ok(BoundExpr::Cast {
                expr: Box::new(self.bind(inner, scope)?),
                data_type: *data_type,
            }),
            Expr::IsNull {
                expr: inner,
                negated,
            } => Ok(BoundExpr::IsNull {
                expr: Box::new(self.bind(inner, scope)?),
                negated: *negated,
            }),
            Expr::InList {
                expr: inner,
                values,
                negated,
            } => Ok(BoundExpr::InList {
                expr: Box::new(self.bind(inner, scope)?),
                values: values
                    .iter()
                    .map(|v| self.bind(v, scope))
                    .collect::<PlanResult<_>>()?,
                negated: *negated,
            }),
        }
    }

    /// A bare name matching a select alias, outside any derivation.
    fn alias(&self, path: &ConceptPath, span: &Span) -> PlanResult<Option<BoundExpr>> {
        if !self.stack.is_empty() || path.segments.len() != 1 {
            return Ok(None);
        }
        match self.aliases.get(path.name()) {
            Some(bound) if self.in_aggregate && bound.contains_aggregate() => Err(
                PlanError::unsupported("aggregates cannot be nested", span),
            ),
            Some(bound) => Ok(Some(bound.clone())),
            None => Ok(None),
        }
    }

    fn concept(&mut self, id: ConceptId, span: &Span) -> PlanResult<BoundExpr> {
        let model = self.model;
        if model.is_mapped(id) {
            return Ok(BoundExpr::Column(id));
        }

        let concept = model.concept(id);
        let Some(derivation) = &concept.derivation else {
            return Err(PlanError::NoDatasourceForConcept {
                concept: model.describe(id),
                span: self.error_span(span),
            });
        };

        if let Some(pos) = self.stack.iter().position(|c| *c == id) {
            let mut cycle: Vec<String> = self.stack[pos..]
                .iter()
                .map(|c| model.describe(*c))
                .collect();
            cycle.push(model.describe(id));
            return Err(PlanError::CyclicDerivation {
                cycle,
                span: self.anchor.clone(),
            });
        }

        if self.stack.is_empty() {
            self.anchor = span.clone();
        }
        log::trace!(concept = concept.address.as_str(), depth = self.stack.len(); "Expanding derivation");
        self.stack.push(id);
        let bound = self.bind(derivation, concept.file);
        self.stack.pop();
        bound
    }

    /// `by` concepts partition rows, so they must be read from a column.
    fn grouping_concept(&self, scope: FileId, path: &Spanned<ConceptPath>) -> PlanResult<ConceptId> {
        let id = self.lookup(scope, path, &path.span)?;
        if self.model.is_mapped(id) {
            Ok(id)
        } else {
            Err(PlanError::unsupported(
                format!(
                    "grouping concept `{}` is not mapped by any datasource",
                    self.model.describe(id)
                ),
                &self.error_span(&path.span),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{load_and_bind, InMemoryResolver};

    const MODEL: &str = r#"
key customer_id int;
property customer_id.name string;
property customer_id.shout <- upper(name);
property customer_id.loop_a <- loop_b;
property customer_id.loop_b <- loop_a;
metric customer_id.orphan int;
key order_id int;
property order_id.total float;
auto revenue <- sum(total);

datasource customers (c_id: customer_id, c_name: name) grain (customer_id) address tpch.customer;
datasource orders (o_id: order_id, o_cust: customer_id, o_total: total) grain (order_id) address tpch.orders;
"#;

    fn model() -> Model {
        load_and_bind("main", MODEL, &InMemoryResolver::new()).expect("model binds")
    }

    fn resolve(model: &Model, expr: &str) -> PlanResult<BoundExpr> {
        let parsed = crate::dsl::parse(&format!("select {};", expr));
        let script = parsed.script.expect("query parses");
        let query = script.queries().next().expect("one query");
        let item = &query.value.selects[0];
        Resolver::new(model).resolve(&item.expr, model.root())
    }

    fn id(model: &Model, path: &str) -> ConceptId {
        let segments = path.split('.').map(String::from).collect();
        model
            .lookup_concept(model.root(), &ConceptPath::new(segments))
            .expect("concept exists")
    }

    #[test]
    fn test_mapped_concept_is_column() {
        let model = model();
        let bound = resolve(&model, "name").unwrap();
        assert_eq!(bound, BoundExpr::Column(id(&model, "name")));
    }

    #[test]
    fn test_derivation_is_inlined() {
        let model = model();
        let bound = resolve(&model, "shout").unwrap();
        match bound {
            BoundExpr::Function { name, args } => {
                assert_eq!(name, "upper");
                assert_eq!(args, vec![BoundExpr::Column(id(&model, "name"))]);
            }
            other => panic!("Expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_metric_expands_to_aggregate() {
        let model = model();
        let bound = resolve(&model, "revenue").unwrap();
        assert!(bound.contains_plain_aggregate());
    }

    #[test]
    fn test_cyclic_derivation() {
        let model = model();
        match resolve(&model, "loop_a") {
            Err(PlanError::CyclicDerivation { cycle, span }) => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 3);
                assert_eq!(span, 7..13);
            }
            other => panic!("Expected CyclicDerivation, got {:?}", other),
        }
    }

    #[test]
    fn test_unmapped_underived_concept() {
        let model = model();
        match resolve(&model, "orphan") {
            Err(PlanError::NoDatasourceForConcept { concept, .. }) => {
                assert_eq!(concept, "orphan");
            }
            other => panic!("Expected NoDatasourceForConcept, got {:?}", other),
        }
    }

    #[test]
    fn test_unresolved_reference() {
        let model = model();
        match resolve(&model, "nope") {
            Err(PlanError::Bind(BindError::UnresolvedConceptReference { name, .. })) => {
                assert_eq!(name, "nope");
            }
            other => panic!("Expected unresolved reference, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_aggregate_through_metric() {
        let model = model();
        assert!(matches!(
            resolve(&model, "sum(revenue)"),
            Err(PlanError::UnsupportedAggregateCombination { .. })
        ));
    }

    #[test]
    fn test_by_concepts_sorted() {
        let model = model();
        let bound = resolve(&model, "count(*) by (order_id, customer_id)").unwrap();
        match bound {
            BoundExpr::Aggregate { by, arg, .. } => {
                assert!(arg.is_none());
                assert_eq!(by, vec![id(&model, "customer_id"), id(&model, "order_id")]);
            }
            other => panic!("Expected aggregate, got {:?}", other),
        }
    }

    #[test]
    fn test_columns_and_free_columns() {
        let model = model();
        let bound = resolve(&model, "sum(total) by customer_id").unwrap();
        let mut all = BTreeSet::new();
        bound.columns(&mut all);
        assert_eq!(all.len(), 2);

        let mut free = BTreeSet::new();
        bound.free_columns(&mut free);
        assert!(free.is_empty());
    }
}
