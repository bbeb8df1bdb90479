//! Query planner - compiles a query statement against a bound model into SQL.
//!
//! Four phases:
//! 1. Resolution: concept paths → [`BoundExpr`] with derivations inlined
//! 2. Aggregation: implied grain, grouping and windowing decisions
//! 3. Sources: anchor datasource plus the joins covering every concept
//! 4. Emission: [`sql::Query`](crate::sql::Query) and the output schema

pub mod emit;
pub mod error;
pub mod resolve;
pub mod sources;

pub use emit::{AggregateScope, ExprConverter, QueryContext};
pub use error::{PlanError, PlanResult};
pub use resolve::{BoundExpr, Resolver};
pub use sources::{JoinStep, SourcePlan};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::dsl::ast::{
    BinaryOp, ConceptPath, Expr, NullsPosition, OrderItem, QueryStmt, SelectItem, SortDirection,
};
use crate::dsl::Span;
use crate::model::{Address, ConceptId, DataType, DatasourceId, FileId, Model};
use crate::semantic::infer_type;
use crate::sql::{
    col, lit_bool, table_col, Dialect, Expr as SqlExpr, ExprExt, JoinType, NullsOrder, OrderByExpr,
    Query, SelectExpr, SqlDialect, TableRef, TableSource,
};

/// Planner settings, loaded from the `[planner]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerOptions {
    /// Join type used for every join (default `LEFT`).
    pub join_type: JoinType,
    /// Reject queries where two equally short join paths exist.
    pub strict_join_paths: bool,
}

/// One column of a compiled query's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputColumn {
    pub name: String,
    pub data_type: Option<DataType>,
}

/// A planned query ready to hand to an engine.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    #[serde(skip)]
    pub query: Query,
    pub schema: Vec<OutputColumn>,
    pub dialect: Dialect,
    /// Datasource names in join order.
    pub datasources: Vec<String>,
}

/// Plan a query written in file `scope` of `model`.
pub fn plan_query(
    model: &Model,
    query: &QueryStmt,
    scope: FileId,
    dialect: Dialect,
    options: &PlannerOptions,
) -> PlanResult<CompiledQuery> {
    SqlPlanner::new(model, scope, dialect, options).plan(query)
}

/// A resolved select item.
struct Item {
    bound: BoundExpr,
    name: String,
    span: Span,
}

enum OrderTarget {
    /// A selected item, ordered by its output name.
    Output(String),
    Expr(BoundExpr),
}

struct Ordering {
    target: OrderTarget,
    direction: SortDirection,
    nulls: Option<NullsPosition>,
    span: Span,
}

/// Main entry point for SQL planning.
pub struct SqlPlanner<'a> {
    model: &'a Model,
    scope: FileId,
    dialect: Dialect,
    options: PlannerOptions,
}

impl<'a> SqlPlanner<'a> {
    pub fn new(model: &'a Model, scope: FileId, dialect: Dialect, options: &PlannerOptions) -> Self {
        Self {
            model,
            scope,
            dialect,
            options: *options,
        }
    }

    pub fn plan(&self, stmt: &QueryStmt) -> PlanResult<CompiledQuery> {
        let model = self.model;
        let mut resolver = Resolver::new(model);

        // Phase 1: resolution
        let mut items = Vec::with_capacity(stmt.selects.len());
        for (select, name) in stmt.selects.iter().zip(output_names(&stmt.selects)) {
            let bound = resolver.resolve(&select.expr, self.scope)?;
            self.check_mixed(&bound, &select.expr.span)?;
            items.push(Item {
                bound,
                name,
                span: select.expr.span.clone(),
            });
        }

        let mut filter = match &stmt.where_clause {
            Some(expr) => {
                let bound = resolver.resolve(expr, self.scope)?;
                if bound.contains_aggregate() {
                    return Err(PlanError::unsupported(
                        "aggregates are not allowed in `where`; use `having`",
                        &expr.span,
                    ));
                }
                Some((bound, expr.span.clone()))
            }
            None => None,
        };

        resolver.set_aliases(
            stmt.selects
                .iter()
                .zip(&items)
                .filter_map(|(s, i)| s.alias.as_ref().map(|a| (a.value.clone(), i.bound.clone())))
                .collect(),
        );
        let mut having = match &stmt.having {
            Some(expr) => Some((resolver.resolve(expr, self.scope)?, expr.span.clone())),
            None => None,
        };
        resolver.clear_aliases();

        let mut ordering = Vec::with_capacity(stmt.order_by.len());
        for item in &stmt.order_by {
            ordering.push(self.resolve_order(&mut resolver, item, stmt, &items)?);
        }

        // Phase 2: aggregation
        let mut grouping = BTreeSet::new();
        for item in items.iter().filter(|i| !i.bound.contains_aggregate()) {
            item.bound.free_columns(&mut grouping);
        }
        let grain = key_grain(model, grouping.iter().copied());

        let mut grouped = items.iter().any(|i| i.bound.contains_plain_aggregate())
            || having
                .as_ref()
                .is_some_and(|(h, _)| h.contains_plain_aggregate())
            || ordering.iter().any(|o| match &o.target {
                OrderTarget::Expr(e) => e.contains_plain_aggregate(),
                OrderTarget::Output(_) => false,
            });
        let mut windowed = !grouped && items.iter().any(|i| i.bound.contains_aggregate());
        let mut scope_grain = grain.clone();
        if windowed {
            if let Some(by_grain) = self.by_grouping(&items, &grouping)? {
                // DISTINCT cannot keep one row per partition; group by it
                grouped = true;
                windowed = false;
                scope_grain = by_grain;
            }
        }

        if !grouped {
            if let Some((h, span)) = having.take() {
                if h.contains_aggregate() {
                    return Err(PlanError::unsupported(
                        "windowed `by` aggregates are not allowed in `having`",
                        &span,
                    ));
                }
                // Without GROUP BY a having predicate filters rows
                filter = Some(match filter {
                    Some((w, wspan)) => (
                        BoundExpr::Binary {
                            left: Box::new(w),
                            op: BinaryOp::And,
                            right: Box::new(h),
                        },
                        wspan.start.min(span.start)..wspan.end.max(span.end),
                    ),
                    None => (h, span),
                });
            }
        }

        // Phase 3: sources
        let mut required: BTreeMap<ConceptId, Span> = BTreeMap::new();
        {
            let mut note = |bound: &BoundExpr, span: &Span| {
                let mut columns = BTreeSet::new();
                bound.columns(&mut columns);
                for c in columns {
                    required.entry(c).or_insert_with(|| span.clone());
                }
            };
            for item in &items {
                note(&item.bound, &item.span);
            }
            if let Some((w, span)) = &filter {
                note(w, span);
            }
            if let Some((h, span)) = &having {
                note(h, span);
            }
            for o in &ordering {
                if let OrderTarget::Expr(e) = &o.target {
                    note(e, &o.span);
                }
            }
        }

        let plan = if required.is_empty() {
            None
        } else {
            let needed: BTreeSet<ConceptId> = required.keys().copied().collect();
            let anchor = sources::choose_anchor(model, &grain, &needed).ok_or_else(|| {
                let (concept, span) = required
                    .iter()
                    .next()
                    .map(|(c, s)| (model.describe(*c), s.clone()))
                    .unwrap_or_default();
                PlanError::NoDatasourceForConcept { concept, span }
            })?;
            log::trace!(anchor = model.datasource(anchor).name.as_str(); "Chose anchor datasource");
            Some(sources::cover(
                model,
                anchor,
                &required,
                self.options.strict_join_paths,
            )?)
        };

        // Phase 4: emission
        let context = QueryContext::new(model, plan.as_ref());
        let converter = ExprConverter::new(
            model,
            &context,
            AggregateScope {
                grouped,
                grain: &scope_grain,
            },
        );

        let mut select = Vec::with_capacity(items.len());
        let mut group_by: Vec<SqlExpr> = Vec::new();
        for item in &items {
            let expr = converter.convert(&item.bound, &item.span)?;
            let mut columns = BTreeSet::new();
            item.bound.columns(&mut columns);
            if grouped && !item.bound.contains_aggregate() && !columns.is_empty() {
                push_unique(&mut group_by, expr.clone());
            }
            select.push(SelectExpr::new(expr).with_alias(&item.name));
        }
        if grouped {
            // Windowed re-aggregation partitions by these columns
            let mut sets = Vec::new();
            for item in &items {
                item.bound.grouping_sets(&mut sets);
            }
            for concept in sets.into_iter().flatten() {
                push_unique(&mut group_by, context.column(model, concept)?);
            }
        }

        let mut query = Query::new().select(select);
        if windowed {
            query = query.distinct();
        }

        if let Some(plan) = &plan {
            query = query.from(self.table_ref(plan.anchor, &context));
            let join_type = self.join_type();
            for step in &plan.steps {
                query = query.join(
                    join_type,
                    self.table_ref(step.child, &context),
                    self.join_condition(step, &context),
                );
            }
        }

        if let Some((w, span)) = &filter {
            query = query.filter(converter.convert(w, span)?);
        }
        if !group_by.is_empty() {
            query = query.group_by(group_by);
        }
        if let Some((h, span)) = &having {
            let expr = converter.convert(h, span)?;
            if emit::contains_window(&expr) {
                return Err(PlanError::unsupported(
                    "windowed `by` aggregates are not allowed in `having`",
                    span,
                ));
            }
            query = query.having(expr);
        }

        let mut order_by = Vec::with_capacity(ordering.len());
        for o in &ordering {
            let expr = match &o.target {
                OrderTarget::Output(name) => col(name),
                OrderTarget::Expr(bound) => {
                    self.check_order(bound, grouped, windowed, &grouping, &o.span)?;
                    converter.convert(bound, &o.span)?
                }
            };
            let order = match o.direction {
                SortDirection::Asc => OrderByExpr::asc(expr),
                SortDirection::Desc => OrderByExpr::desc(expr),
            };
            order_by.push(order.with_nulls(o.nulls.map(|n| match n {
                NullsPosition::First => NullsOrder::First,
                NullsPosition::Last => NullsOrder::Last,
            })));
        }
        if !order_by.is_empty() {
            query = query.order_by(order_by);
        }
        if let Some(limit) = &stmt.limit {
            query = query.limit(limit.value);
        }

        let schema = stmt
            .selects
            .iter()
            .zip(&items)
            .map(|(select, item)| OutputColumn {
                name: item.name.clone(),
                data_type: infer_type(&select.expr.value, &mut |path: &ConceptPath| {
                    model
                        .lookup_concept(self.scope, path)
                        .and_then(|id| model.concept(id).data_type)
                }),
            })
            .collect();

        let datasources: Vec<String> = plan
            .as_ref()
            .map(|p| {
                p.datasources()
                    .map(|id| model.datasource(id).name.clone())
                    .collect()
            })
            .unwrap_or_default();

        log::debug!(
            datasources = datasources.len(),
            grouped = grouped,
            windowed = windowed,
            dialect = self.dialect.name();
            "Planned query"
        );

        Ok(CompiledQuery {
            sql: query.to_sql(self.dialect),
            query,
            schema,
            dialect: self.dialect,
            datasources,
        })
    }

    /// Aggregated items may only read concepts inside their aggregates.
    fn check_mixed(&self, bound: &BoundExpr, span: &Span) -> PlanResult<()> {
        if !bound.contains_aggregate() {
            return Ok(());
        }
        let mut free = BTreeSet::new();
        bound.free_columns(&mut free);
        match free.into_iter().next() {
            Some(concept) => Err(PlanError::unsupported(
                format!(
                    "`{}` must be aggregated or selected on its own",
                    self.model.describe(concept)
                ),
                span,
            )),
            None => Ok(()),
        }
    }

    /// Grain to group an ungrouped `by` query by, when the selected concepts
    /// do not fix every partition. `None` keeps the DISTINCT window form.
    fn by_grouping(
        &self,
        items: &[Item],
        selected: &BTreeSet<ConceptId>,
    ) -> PlanResult<Option<BTreeSet<ConceptId>>> {
        let mut by_lists: Vec<(BTreeSet<ConceptId>, &Span)> = Vec::new();
        for item in items {
            let mut sets = Vec::new();
            item.bound.grouping_sets(&mut sets);
            by_lists.extend(sets.into_iter().map(|by| (by.into_iter().collect(), &item.span)));
        }

        let unfixed = by_lists.iter().find_map(|(by, span)| {
            by.iter()
                .find(|c| !self.fixed_by(**c, selected))
                .map(|c| (*c, *span))
        });
        let Some((concept, span)) = unfixed else {
            return Ok(None);
        };
        if !selected.is_empty() {
            return Err(PlanError::unsupported(
                format!(
                    "`{}` must be selected to partition a `by` aggregate",
                    self.model.describe(concept)
                ),
                span,
            ));
        }

        let Some((first, _)) = by_lists.first() else {
            return Ok(None);
        };
        if let Some((_, span)) = by_lists.iter().find(|(by, _)| by != first) {
            return Err(PlanError::unsupported(
                "`by` aggregates selected on their own must share one `by` list",
                span,
            ));
        }
        Ok(Some(key_grain(self.model, first.iter().copied())))
    }

    /// Whether each row's `selected` values determine `concept`.
    fn fixed_by(&self, concept: ConceptId, selected: &BTreeSet<ConceptId>) -> bool {
        if selected.contains(&concept) {
            return true;
        }
        let owners = self.model.owner_keys(concept);
        if !owners.is_empty() && owners.iter().all(|o| selected.contains(o)) {
            return true;
        }
        // A datasource's grain determines every concept it maps
        self.model.datasources().iter().any(|ds| {
            !ds.grain.is_empty()
                && ds.grain.iter().all(|g| selected.contains(g))
                && ds.supplies(concept)
        })
    }

    fn resolve_order(
        &self,
        resolver: &mut Resolver<'_>,
        item: &OrderItem,
        stmt: &QueryStmt,
        items: &[Item],
    ) -> PlanResult<Ordering> {
        let ordering = |target| Ordering {
            target,
            direction: item.direction,
            nulls: item.nulls,
            span: item.expr.span.clone(),
        };

        if let Expr::Concept(path) = &item.expr.value {
            if path.segments.len() == 1 {
                let aliased = stmt
                    .selects
                    .iter()
                    .position(|s| s.alias.as_ref().is_some_and(|a| a.value == path.name()));
                if let Some(i) = aliased {
                    return Ok(ordering(OrderTarget::Output(items[i].name.clone())));
                }
            }
        }

        let bound = resolver.resolve(&item.expr, self.scope)?;
        match items.iter().find(|i| i.bound == bound) {
            Some(selected) => Ok(ordering(OrderTarget::Output(selected.name.clone()))),
            None => Ok(ordering(OrderTarget::Expr(bound))),
        }
    }

    fn check_order(
        &self,
        bound: &BoundExpr,
        grouped: bool,
        windowed: bool,
        grouping: &BTreeSet<ConceptId>,
        span: &Span,
    ) -> PlanResult<()> {
        if windowed {
            return Err(PlanError::InvalidOrdering {
                reason: "queries with `by` aggregates can only order by selected items".into(),
                span: span.clone(),
            });
        }
        if grouped {
            let mut free = BTreeSet::new();
            bound.free_columns(&mut free);
            if let Some(concept) = free.iter().find(|c| !grouping.contains(c)) {
                return Err(PlanError::InvalidOrdering {
                    reason: format!(
                        "`{}` is not grouped; select it or order by an aggregate",
                        self.model.describe(*concept)
                    ),
                    span: span.clone(),
                });
            }
        }
        Ok(())
    }

    fn join_type(&self) -> JoinType {
        if self.options.join_type == JoinType::Full && !self.dialect.supports_full_outer_join() {
            log::warn!(dialect = self.dialect.name(); "FULL OUTER JOIN is not supported, using LEFT JOIN");
            return JoinType::Left;
        }
        self.options.join_type
    }

    fn table_ref(&self, id: DatasourceId, context: &QueryContext) -> TableRef {
        let ds = self.model.datasource(id);
        let source = match &ds.address {
            Address::Table { schema, name } => {
                let mut parts: Vec<String> = schema
                    .iter()
                    .flat_map(|s| s.split('.'))
                    .map(String::from)
                    .collect();
                parts.push(name.clone());
                TableSource::Table(parts)
            }
            Address::File(path) => TableSource::File(path.clone()),
            Address::Raw(raw) => TableSource::Raw(raw.clone()),
        };
        let table = TableRef::from_source(source);
        match context.table_alias(id) {
            Some(alias) => table.with_alias(alias),
            None => table,
        }
    }

    /// Equality on every shared key column.
    fn join_condition(&self, step: &JoinStep, context: &QueryContext) -> SqlExpr {
        let parent = self.model.datasource(step.parent);
        let child = self.model.datasource(step.child);
        let parent_alias = context.table_alias(step.parent).unwrap_or(&parent.name);
        let child_alias = context.table_alias(step.child).unwrap_or(&child.name);

        let mut on: Option<SqlExpr> = None;
        for key in &step.keys {
            let (Some(left), Some(right)) = (parent.column_for(*key), child.column_for(*key))
            else {
                continue;
            };
            let cond = table_col(parent_alias, left).eq(table_col(child_alias, right));
            on = Some(match on {
                Some(prev) => prev.and(cond),
                None => cond,
            });
        }
        on.unwrap_or_else(|| lit_bool(true))
    }
}

/// Keys owning `concepts`; a key stands for itself.
pub(crate) fn key_grain(
    model: &Model,
    concepts: impl IntoIterator<Item = ConceptId>,
) -> BTreeSet<ConceptId> {
    let mut keys = BTreeSet::new();
    for concept in concepts {
        let owners = model.owner_keys(concept);
        if owners.is_empty() {
            keys.insert(concept);
        } else {
            keys.extend(owners);
        }
    }
    keys
}

fn push_unique(exprs: &mut Vec<SqlExpr>, expr: SqlExpr) {
    if !exprs.contains(&expr) {
        exprs.push(expr);
    }
}

/// Output column names, deduplicated with `_2`, `_3` suffixes.
fn output_names(selects: &[SelectItem]) -> Vec<String> {
    let mut used: HashMap<String, usize> = HashMap::new();
    selects
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let base = default_name(item, i);
            let count = used.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{}_{}", base, count)
            }
        })
        .collect()
}

fn default_name(item: &SelectItem, index: usize) -> String {
    if let Some(alias) = &item.alias {
        return alias.value.clone();
    }
    match &item.expr.value {
        Expr::Concept(path) => path.underscored(),
        Expr::Aggregate { func, arg: None, .. } => func.name().to_string(),
        Expr::Aggregate {
            func,
            arg: Some(arg),
            ..
        } => match &arg.value {
            Expr::Concept(path) => format!("{}_{}", func.name(), path.underscored()),
            _ => format!("col_{}", index + 1),
        },
        Expr::Function { name, args } if args.len() == 1 => match &args[0].value {
            Expr::Concept(path) => format!("{}_{}", name.to_ascii_lowercase(), path.underscored()),
            _ => format!("col_{}", index + 1),
        },
        _ => format!("col_{}", index + 1),
    }
}
