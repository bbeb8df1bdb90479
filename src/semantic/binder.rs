//! Binding parsed files into a [`Model`].
//!
//! Binding runs in three passes over the program, each file after the
//! files it imports:
//!
//! 1. **Namespaces**: import aliases become per-file scopes.
//! 2. **Concepts**: names are registered first, then owners are resolved,
//!    derivations checked, `auto` purposes classified and types inferred.
//! 3. **Datasources**: column mappings and grain are resolved.
//!
//! Binding is pure: the same program always yields the same ids, addresses
//! and version.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;

use super::error::{BindError, BindResult};
use super::infer::infer_type;
use super::loader::Program;
use crate::cache::hash_sources;
use crate::dsl::ast::{AddressRef, ConceptDecl, ConceptKind, ConceptPath, Expr, OwnerRef};
use crate::dsl::{Span, Spanned};
use crate::model::{
    Address, ColumnBinding, Concept, ConceptId, ConceptOwner, DataType, Datasource, DatasourceId,
    FileId, JointKey, JointKeyId, Model, Purpose, SourceFile,
};

/// Bind a loaded program into a model.
pub fn bind(program: &Program) -> BindResult<Model> {
    let mut binder = Binder::new(program);
    binder.bind_namespaces()?;
    binder.register_concepts()?;
    binder.resolve_owners()?;
    binder.check_derivations()?;
    binder.classify();
    binder.bind_datasources()?;
    binder.assign_addresses();
    Ok(binder.finish())
}

/// What a concept's derivation implies about it.
#[derive(Debug, Clone, Default)]
struct Analysis {
    aggregate: bool,
    keys: BTreeSet<ConceptId>,
    data_type: Option<DataType>,
}

struct Binder<'p> {
    program: &'p Program,
    order: Vec<usize>,
    files: Vec<SourceFile>,
    concepts: Vec<Concept>,
    decls: Vec<&'p ConceptDecl>,
    joint_keys: Vec<JointKey>,
    joint_index: BTreeMap<Vec<ConceptId>, JointKeyId>,
    datasources: Vec<Datasource>,
}

impl<'p> Binder<'p> {
    fn new(program: &'p Program) -> Self {
        let files = program
            .files
            .iter()
            .enumerate()
            .map(|(i, parsed)| SourceFile {
                id: FileId(i),
                path: parsed.path.clone(),
                source: parsed.source.clone(),
                namespaces: BTreeMap::new(),
                concepts: BTreeMap::new(),
                datasources: BTreeMap::new(),
                queries: parsed
                    .script
                    .queries()
                    .map(|q| Spanned::new(q.value.clone(), q.span))
                    .collect(),
            })
            .collect();

        Self {
            program,
            order: program.dependency_order(),
            files,
            concepts: Vec::new(),
            decls: Vec::new(),
            joint_keys: Vec::new(),
            joint_index: BTreeMap::new(),
            datasources: Vec::new(),
        }
    }

    fn path_of(&self, file: FileId) -> String {
        self.files[file.0].path.clone()
    }

    // ========================================================================
    // Pass 1: namespaces
    // ========================================================================

    fn bind_namespaces(&mut self) -> BindResult<()> {
        for (idx, parsed) in self.program.files.iter().enumerate() {
            for import in parsed.script.imports() {
                let target = self.program.file_index(&import.path.value).ok_or_else(|| {
                    BindError::UnresolvedImport {
                        file: parsed.path.clone(),
                        path: import.path.value.clone(),
                        span: import.path.span.clone(),
                    }
                })?;
                let namespaces = &mut self.files[idx].namespaces;
                if namespaces.contains_key(&import.alias.value) {
                    return Err(BindError::DuplicateNamespace {
                        file: parsed.path.clone(),
                        alias: import.alias.value.clone(),
                        span: import.alias.span.clone(),
                    });
                }
                namespaces.insert(import.alias.value.clone(), FileId(target));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Pass 2: concepts
    // ========================================================================

    fn register_concepts(&mut self) -> BindResult<()> {
        let program = self.program;
        for &fidx in &self.order {
            for decl in program.files[fidx].script.concepts() {
                let file = &mut self.files[fidx];
                if file.concepts.contains_key(&decl.name.value) {
                    return Err(BindError::DuplicateConceptName {
                        file: file.path.clone(),
                        name: decl.name.value.clone(),
                        span: decl.name.span.clone(),
                    });
                }

                let id = ConceptId(self.concepts.len());
                file.concepts.insert(decl.name.value.clone(), id);

                let purpose = match decl.kind {
                    ConceptKind::Key => Purpose::Key,
                    ConceptKind::Property => Purpose::Property,
                    ConceptKind::Metric => Purpose::Metric,
                    // settled by classify()
                    ConceptKind::Auto => Purpose::Constant,
                };

                self.concepts.push(Concept {
                    id,
                    file: FileId(fidx),
                    name: decl.name.value.clone(),
                    address: String::new(),
                    purpose,
                    data_type: decl.data_type.as_ref().map(|t| t.value),
                    owner: None,
                    derivation: decl.derivation.clone(),
                    span: decl.name.span.clone(),
                });
                self.decls.push(decl);
            }
        }
        log::trace!(concepts = self.concepts.len(); "Registered concepts");
        Ok(())
    }

    fn lookup(&self, file: FileId, path: &ConceptPath) -> Option<ConceptId> {
        let (name, namespaces) = path.segments.split_last()?;
        let mut scope = file;
        for ns in namespaces {
            scope = *self.files[scope.0].namespaces.get(ns)?;
        }
        self.files[scope.0].concepts.get(name).copied()
    }

    fn resolve(&self, file: FileId, path: &ConceptPath, span: &Span) -> BindResult<ConceptId> {
        self.lookup(file, path)
            .ok_or_else(|| BindError::UnresolvedConceptReference {
                file: self.path_of(file),
                name: path.to_string(),
                span: span.clone(),
            })
    }

    fn resolve_owner(
        &self,
        file: FileId,
        decl: &ConceptDecl,
        path: &Spanned<ConceptPath>,
    ) -> BindResult<ConceptId> {
        let id = self.resolve(file, &path.value, &path.span)?;
        if self.decls[id.0].kind != ConceptKind::Key {
            return Err(BindError::InvalidOwner {
                file: self.path_of(file),
                name: decl.name.value.clone(),
                owner: path.value.to_string(),
                span: path.span.clone(),
            });
        }
        Ok(id)
    }

    fn intern_joint_key(&mut self, members: Vec<ConceptId>) -> JointKeyId {
        if let Some(id) = self.joint_index.get(&members) {
            return *id;
        }
        let id = JointKeyId(self.joint_keys.len());
        self.joint_keys.push(JointKey {
            id,
            members: members.clone(),
        });
        self.joint_index.insert(members, id);
        id
    }

    /// Owner for a set of keys; one key is a plain owner.
    fn owner_for(&mut self, mut members: Vec<ConceptId>) -> Option<ConceptOwner> {
        members.sort();
        members.dedup();
        match members.len() {
            0 => None,
            1 => Some(ConceptOwner::Single(members[0])),
            _ => Some(ConceptOwner::Composite(self.intern_joint_key(members))),
        }
    }

    fn resolve_owners(&mut self) -> BindResult<()> {
        for i in 0..self.concepts.len() {
            let decl = self.decls[i];
            let file = self.concepts[i].file;
            let members = match &decl.owner {
                None => continue,
                Some(OwnerRef::Single(path)) => vec![self.resolve_owner(file, decl, path)?],
                Some(OwnerRef::Composite(paths)) => paths
                    .iter()
                    .map(|p| self.resolve_owner(file, decl, p))
                    .collect::<BindResult<Vec<_>>>()?,
            };
            let owner = self.owner_for(members);
            self.concepts[i].owner = owner;
        }
        Ok(())
    }

    fn check_derivations(&self) -> BindResult<()> {
        for concept in &self.concepts {
            let Some(derivation) = &concept.derivation else {
                continue;
            };
            let mut missing: Option<(&ConceptPath, &Span)> = None;
            derivation.visit_concepts(&mut |path, span| {
                if missing.is_none() && self.lookup(concept.file, path).is_none() {
                    missing = Some((path, span));
                }
            });
            if let Some((path, span)) = missing {
                return Err(BindError::UnresolvedConceptReference {
                    file: self.path_of(concept.file),
                    name: path.to_string(),
                    span: span.clone(),
                });
            }
        }
        Ok(())
    }

    fn declared_owner_keys(&self, id: ConceptId) -> BTreeSet<ConceptId> {
        match self.concepts[id.0].owner {
            Some(ConceptOwner::Single(k)) => BTreeSet::from([k]),
            Some(ConceptOwner::Composite(j)) => {
                self.joint_keys[j.0].members.iter().copied().collect()
            }
            None => BTreeSet::new(),
        }
    }

    fn analyze(
        &self,
        id: ConceptId,
        memo: &mut Vec<Option<Analysis>>,
        visiting: &mut Vec<bool>,
    ) -> Analysis {
        if let Some(done) = &memo[id.0] {
            return done.clone();
        }
        // A cycle is reported when a query expands it
        if visiting[id.0] {
            return Analysis::default();
        }
        visiting[id.0] = true;

        let concept = &self.concepts[id.0];
        let derived = concept
            .derivation
            .as_ref()
            .map(|d| self.analyze_expr(concept.file, d, memo, visiting))
            .unwrap_or_default();

        let data_type = concept.data_type.or(derived.data_type);
        let analysis = match self.decls[id.0].kind {
            ConceptKind::Key => Analysis {
                aggregate: false,
                keys: BTreeSet::from([id]),
                data_type,
            },
            ConceptKind::Property => Analysis {
                aggregate: false,
                keys: self.declared_owner_keys(id),
                data_type,
            },
            ConceptKind::Metric => Analysis {
                aggregate: true,
                keys: self.declared_owner_keys(id),
                data_type,
            },
            ConceptKind::Auto => Analysis {
                data_type,
                ..derived
            },
        };

        visiting[id.0] = false;
        memo[id.0] = Some(analysis.clone());
        analysis
    }

    fn analyze_expr(
        &self,
        file: FileId,
        expr: &Spanned<Expr>,
        memo: &mut Vec<Option<Analysis>>,
        visiting: &mut Vec<bool>,
    ) -> Analysis {
        let mut refs: Vec<ConceptId> = Vec::new();
        expr.visit_concepts(&mut |path, _| {
            if let Some(id) = self.lookup(file, path) {
                refs.push(id);
            }
        });

        let mut result = Analysis {
            aggregate: expr.contains_aggregate(),
            ..Analysis::default()
        };
        for id in refs {
            let sub = self.analyze(id, memo, visiting);
            result.aggregate |= sub.aggregate;
            result.keys.extend(sub.keys);
        }

        result.data_type = infer_type(&expr.value, &mut |path: &ConceptPath| {
            let id = self.lookup(file, path)?;
            self.analyze(id, memo, visiting).data_type
        });
        result
    }

    /// Settle `auto` purposes and owners, and fill in inferred types.
    fn classify(&mut self) {
        let n = self.concepts.len();
        let mut memo: Vec<Option<Analysis>> = vec![None; n];
        let mut visiting = vec![false; n];
        let analyses: Vec<Analysis> = (0..n)
            .map(|i| self.analyze(ConceptId(i), &mut memo, &mut visiting))
            .collect();

        for (i, analysis) in analyses.into_iter().enumerate() {
            if self.decls[i].kind == ConceptKind::Auto {
                let (purpose, owner) = if analysis.aggregate {
                    (Purpose::Metric, None)
                } else if analysis.keys.is_empty() {
                    (Purpose::Constant, None)
                } else {
                    let keys = analysis.keys.iter().copied().collect();
                    let owner = self.owner_for(keys);
                    (Purpose::Property, owner)
                };
                self.concepts[i].purpose = purpose;
                self.concepts[i].owner = owner;
            }
            self.concepts[i].data_type = analysis.data_type;
        }
    }

    // ========================================================================
    // Pass 3: datasources
    // ========================================================================

    fn bind_datasources(&mut self) -> BindResult<()> {
        let program = self.program;
        for &fidx in &self.order.clone() {
            let file = FileId(fidx);
            for decl in program.files[fidx].script.datasources() {
                if self.files[fidx].datasources.contains_key(&decl.name.value) {
                    return Err(BindError::DuplicateDatasourceName {
                        file: self.path_of(file),
                        name: decl.name.value.clone(),
                        span: decl.name.span.clone(),
                    });
                }

                let columns = decl
                    .columns
                    .iter()
                    .map(|m| {
                        Ok(ColumnBinding {
                            column: m.column.value.clone(),
                            concept: self.resolve(file, &m.concept.value, &m.concept.span)?,
                        })
                    })
                    .collect::<BindResult<Vec<_>>>()?;

                let mut grain = match &decl.grain {
                    Some(paths) => {
                        let mut grain = Vec::with_capacity(paths.len());
                        for path in paths {
                            let id = self.resolve(file, &path.value, &path.span)?;
                            if !columns.iter().any(|c| c.concept == id) {
                                return Err(BindError::DatasourceGrainMismatch {
                                    file: self.path_of(file),
                                    datasource: decl.name.value.clone(),
                                    concept: path.value.to_string(),
                                    span: path.span.clone(),
                                });
                            }
                            grain.push(id);
                        }
                        grain
                    }
                    None => columns
                        .iter()
                        .map(|c| c.concept)
                        .filter(|c| self.concepts[c.0].purpose == Purpose::Key)
                        .collect(),
                };
                grain.sort();
                grain.dedup();

                let address = match &decl.address.value {
                    AddressRef::Table(segments) => Address::from_segments(segments),
                    AddressRef::File(path) => Address::File(path.clone()),
                    AddressRef::Quoted(raw) => Address::Raw(raw.clone()),
                };

                let id = DatasourceId(self.datasources.len());
                self.files[fidx]
                    .datasources
                    .insert(decl.name.value.clone(), id);
                self.datasources.push(Datasource {
                    id,
                    file,
                    name: decl.name.value.clone(),
                    address,
                    columns,
                    grain,
                    span: decl.name.span.clone(),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Addresses and assembly
    // ========================================================================

    /// Each concept's address is its name prefixed by the shortest alias
    /// path from the root file.
    fn assign_addresses(&mut self) {
        let mut prefixes: Vec<Option<String>> = vec![None; self.files.len()];
        let mut queue = VecDeque::new();
        if !self.files.is_empty() {
            prefixes[0] = Some(String::new());
            queue.push_back(0usize);
        }
        while let Some(current) = queue.pop_front() {
            let prefix = prefixes[current].clone().unwrap_or_default();
            for (alias, target) in &self.files[current].namespaces {
                if prefixes[target.0].is_none() {
                    let next = if prefix.is_empty() {
                        alias.clone()
                    } else {
                        format!("{}.{}", prefix, alias)
                    };
                    prefixes[target.0] = Some(next);
                    queue.push_back(target.0);
                }
            }
        }

        for concept in &mut self.concepts {
            concept.address = match prefixes[concept.file.0].as_deref() {
                Some("") | None => concept.name.clone(),
                Some(prefix) => format!("{}.{}", prefix, concept.name),
            };
        }
    }

    fn finish(self) -> Model {
        let version = hash_sources(
            self.files
                .iter()
                .map(|f| (f.path.as_str(), f.source.as_str())),
        );

        let mut imports: DiGraph<FileId, String> = DiGraph::new();
        for file in &self.files {
            imports.add_node(file.id);
        }
        for edge in self.program.graph.edge_references() {
            imports.add_edge(edge.source(), edge.target(), edge.weight().alias.clone());
        }

        log::debug!(
            files = self.files.len(),
            concepts = self.concepts.len(),
            datasources = self.datasources.len(),
            version = version.as_str();
            "Bound model"
        );

        let mut model = Model {
            files: self.files,
            concepts: self.concepts,
            joint_keys: self.joint_keys,
            datasources: self.datasources,
            imports,
            join_graph: Default::default(),
            version,
        };
        model.build_join_graph();
        model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{load, InMemoryResolver};

    fn bind_source(root: &str, resolver: &InMemoryResolver) -> Model {
        let program = load("main", root, resolver).expect("program loads");
        bind(&program).expect("model binds")
    }

    #[test]
    fn test_imported_concepts_get_lower_ids() {
        let resolver = InMemoryResolver::new().with("dim", "key id int;");
        let model = bind_source("import dim;\nkey local int;", &resolver);
        let addresses: Vec<&str> = model.concepts().iter().map(|c| c.address.as_str()).collect();
        assert_eq!(addresses, vec!["dim.id", "local"]);
    }

    #[test]
    fn test_joint_keys_are_interned() {
        let model = bind_source(
            "key a int;\nkey b int;\nproperty <a, b>.x int;\nproperty <b, a>.y int;\nproperty <a, a>.z int;",
            &InMemoryResolver::new(),
        );
        assert_eq!(model.joint_keys().len(), 1);
        // A repeated member collapses to a single owner
        let z = model.concepts().iter().find(|c| c.name == "z").unwrap();
        assert_eq!(z.owner, Some(ConceptOwner::Single(ConceptId(0))));
    }

    #[test]
    fn test_address_uses_import_alias() {
        let resolver = InMemoryResolver::new().with("sales.customer", "key id int;");
        let model = bind_source("import sales.customer as c;", &resolver);
        assert_eq!(model.concepts()[0].address, "c.id");
    }

    #[test]
    fn test_auto_over_metric_is_metric() {
        let model = bind_source(
            "key id int;\nproperty id.v float;\nmetric total <- sum(v);\nauto doubled <- total * 2;",
            &InMemoryResolver::new(),
        );
        let doubled = model.concepts().iter().find(|c| c.name == "doubled").unwrap();
        assert_eq!(doubled.purpose, Purpose::Metric);
        assert_eq!(doubled.data_type, Some(DataType::Float));
        assert_eq!(doubled.owner, None);
    }
}
