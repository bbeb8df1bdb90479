//! Datasource selection: the anchor for FROM and the joins that cover the
//! remaining concepts.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use super::{PlanError, PlanResult};
use crate::dsl::Span;
use crate::model::{ConceptId, Datasource, DatasourceId, Model};

/// One join: `child` joined to the already-present `parent` on `keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStep {
    pub parent: DatasourceId,
    pub child: DatasourceId,
    pub keys: Vec<ConceptId>,
}

/// Datasources read by a query, in join order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePlan {
    pub anchor: DatasourceId,
    pub steps: Vec<JoinStep>,
}

impl SourcePlan {
    pub fn datasources(&self) -> impl Iterator<Item = DatasourceId> + '_ {
        std::iter::once(self.anchor).chain(self.steps.iter().map(|s| s.child))
    }
}

fn missing(ds: &Datasource, concepts: &BTreeSet<ConceptId>) -> usize {
    concepts.iter().filter(|c| !ds.supplies(**c)).count()
}

/// Pick the FROM datasource.
///
/// With an implied grain, prefer the datasource whose grain matches it;
/// otherwise prefer the one supplying the most required concepts. Ties go to
/// the earliest declaration.
pub fn choose_anchor(
    model: &Model,
    grain: &BTreeSet<ConceptId>,
    required: &BTreeSet<ConceptId>,
) -> Option<DatasourceId> {
    if !grain.is_empty() {
        let best = model
            .datasources()
            .iter()
            .filter(|ds| grain.iter().any(|c| ds.supplies(*c)))
            .min_by_key(|ds| {
                let ds_grain: BTreeSet<ConceptId> = ds.grain.iter().copied().collect();
                (
                    missing(ds, grain),
                    ds_grain.symmetric_difference(grain).count(),
                    missing(ds, required),
                    ds.id,
                )
            });
        if let Some(ds) = best {
            return Some(ds.id);
        }
    }

    model
        .datasources()
        .iter()
        .filter(|ds| required.iter().any(|c| ds.supplies(*c)))
        .min_by_key(|ds| (missing(ds, required), ds.grain.len(), ds.id))
        .map(|ds| ds.id)
}

/// Join datasources onto `anchor` until every required concept is supplied.
///
/// Concepts are covered in id order, each by the closest supplying
/// datasource. `required` maps each concept to the span of its first use.
pub fn cover(
    model: &Model,
    anchor: DatasourceId,
    required: &BTreeMap<ConceptId, Span>,
    strict: bool,
) -> PlanResult<SourcePlan> {
    let mut joined = vec![anchor];
    let mut steps = Vec::new();

    for (&concept, span) in required {
        if joined
            .iter()
            .any(|ds| model.datasource(*ds).supplies(concept))
        {
            continue;
        }
        for (parent, child) in shortest_path(model, &joined, concept, strict, span)? {
            log::trace!(
                parent = model.datasource(parent).name.as_str(),
                child = model.datasource(child).name.as_str();
                "Adding join"
            );
            steps.push(JoinStep {
                parent,
                child,
                keys: model.shared_keys(parent, child),
            });
            joined.push(child);
        }
    }

    Ok(SourcePlan { anchor, steps })
}

/// Multi-source BFS from the joined set to the nearest datasource supplying
/// `concept`. Returns the edges to add, nearest first.
fn shortest_path(
    model: &Model,
    joined: &[DatasourceId],
    concept: ConceptId,
    strict: bool,
    span: &Span,
) -> PlanResult<Vec<(DatasourceId, DatasourceId)>> {
    let mut dist: HashMap<DatasourceId, usize> = HashMap::new();
    let mut parent: HashMap<DatasourceId, DatasourceId> = HashMap::new();
    // Distinct shortest paths; the joined set counts as a single source
    let mut paths: HashMap<DatasourceId, usize> = HashMap::new();
    let mut queue = VecDeque::new();

    for ds in joined {
        dist.insert(*ds, 0);
        queue.push_back(*ds);
    }

    while let Some(u) = queue.pop_front() {
        let d = dist.get(&u).copied().unwrap_or(0);
        let via = if d == 0 {
            1
        } else {
            paths.get(&u).copied().unwrap_or(1)
        };
        for v in model.join_neighbors(u) {
            match dist.get(&v).copied() {
                None => {
                    dist.insert(v, d + 1);
                    parent.insert(v, u);
                    paths.insert(v, via);
                    queue.push_back(v);
                }
                Some(dv) if dv == d + 1 && d > 0 => {
                    let count = paths.entry(v).or_insert(0);
                    *count = count.saturating_add(via);
                }
                _ => {}
            }
        }
    }

    let suppliers: Vec<(usize, DatasourceId)> = model
        .datasources()
        .iter()
        .filter(|ds| ds.supplies(concept))
        .filter_map(|ds| dist.get(&ds.id).map(|d| (*d, ds.id)))
        .collect();

    let Some(&(best_dist, target)) = suppliers.iter().min() else {
        return Err(PlanError::NoJoinPath {
            concept: model.describe(concept),
            from: model.datasource(joined[0]).name.clone(),
            span: span.clone(),
        });
    };

    if strict {
        let rivals: Vec<DatasourceId> = suppliers
            .iter()
            .filter(|(d, _)| *d == best_dist)
            .map(|(_, id)| *id)
            .collect();
        let total: usize = rivals
            .iter()
            .map(|id| paths.get(id).copied().unwrap_or(1))
            .sum();
        if total > 1 {
            return Err(PlanError::AmbiguousJoinPath {
                concept: model.describe(concept),
                candidates: rivals
                    .iter()
                    .map(|id| model.datasource(*id).name.clone())
                    .collect(),
                paths: total,
                span: span.clone(),
            });
        }
    }

    let mut edges = Vec::new();
    let mut node = target;
    while let Some(&prev) = parent.get(&node) {
        edges.push((prev, node));
        node = prev;
    }
    edges.reverse();
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{load_and_bind, InMemoryResolver};

    // a - b - d and a - c - d: two equally short routes to d
    const DIAMOND: &str = r#"
key a_id int;
key b_id int;
key c_id int;
key d_id int;
property d_id.label string;
property a_id.score int;

datasource a (a_id, b_id, c_id) grain (a_id) address t.a;
datasource b (b_id, d_id) grain (b_id) address t.b;
datasource c (c_id, d_id) grain (c_id) address t.c;
datasource d (d_id, label) grain (d_id) address t.d;
datasource lone (a_id, score) grain (a_id) address t.lone;
"#;

    fn model() -> Model {
        load_and_bind("main", DIAMOND, &InMemoryResolver::new()).expect("model binds")
    }

    fn concept(model: &Model, name: &str) -> ConceptId {
        model.file(model.root()).concepts[name]
    }

    fn ds(model: &Model, name: &str) -> DatasourceId {
        model.lookup_datasource(model.root(), name).expect("datasource exists")
    }

    fn required(model: &Model, names: &[&str]) -> BTreeMap<ConceptId, Span> {
        names.iter().map(|n| (concept(model, n), 0..0)).collect()
    }

    #[test]
    fn test_anchor_prefers_matching_grain() {
        let model = model();
        let grain = BTreeSet::from([concept(&model, "d_id")]);
        let req = BTreeSet::from([concept(&model, "d_id"), concept(&model, "label")]);
        assert_eq!(choose_anchor(&model, &grain, &req), Some(ds(&model, "d")));
    }

    #[test]
    fn test_anchor_tie_goes_to_declaration_order() {
        let model = model();
        let grain = BTreeSet::from([concept(&model, "a_id")]);
        let req = BTreeSet::from([concept(&model, "a_id")]);
        assert_eq!(choose_anchor(&model, &grain, &req), Some(ds(&model, "a")));
    }

    #[test]
    fn test_anchor_for_pure_aggregate() {
        let model = model();
        let req = BTreeSet::from([concept(&model, "score")]);
        assert_eq!(
            choose_anchor(&model, &BTreeSet::new(), &req),
            Some(ds(&model, "lone"))
        );
    }

    #[test]
    fn test_cover_picks_first_declared_route() {
        let model = model();
        let plan = cover(&model, ds(&model, "a"), &required(&model, &["label"]), false).unwrap();
        let order: Vec<DatasourceId> = plan.datasources().collect();
        assert_eq!(order, vec![ds(&model, "a"), ds(&model, "b"), ds(&model, "d")]);
        assert_eq!(plan.steps[1].keys, vec![concept(&model, "d_id")]);
    }

    #[test]
    fn test_cover_strict_rejects_tie() {
        let model = model();
        let err = cover(&model, ds(&model, "a"), &required(&model, &["label"]), true).unwrap_err();
        match err {
            PlanError::AmbiguousJoinPath { paths, .. } => assert_eq!(paths, 2),
            other => panic!("Expected AmbiguousJoinPath, got {:?}", other),
        }
    }

    #[test]
    fn test_cover_skips_supplied_concepts() {
        let model = model();
        let plan = cover(&model, ds(&model, "a"), &required(&model, &["a_id", "b_id"]), true).unwrap();
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn test_no_join_path() {
        let source = r#"
key x_id int;
key y_id int;
datasource xs (x_id) grain (x_id) address t.x;
datasource ys (y_id) grain (y_id) address t.y;
"#;
        let model = load_and_bind("main", source, &InMemoryResolver::new()).unwrap();
        let err = cover(&model, ds(&model, "xs"), &required(&model, &["y_id"]), false).unwrap_err();
        match err {
            PlanError::NoJoinPath { concept, from, .. } => {
                assert_eq!(concept, "y_id");
                assert_eq!(from, "xs");
            }
            other => panic!("Expected NoJoinPath, got {:?}", other),
        }
    }
}
