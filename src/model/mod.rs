//! The bound semantic model.
//!
//! A [`Model`] is produced by the binder from a root file and everything it
//! imports. It is immutable once built and safe to share across threads
//! behind an `Arc`.

pub mod types;

pub use types::{ConceptId, DataType, DatasourceId, FileId, JointKeyId, Purpose, UnknownDataType};

use std::collections::BTreeMap;
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex, UnGraph};
use serde::Serialize;

use crate::dsl::ast::{ConceptPath, Expr, QueryStmt};
use crate::dsl::{Span, Spanned};

/// One loaded source file and its local scope.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: FileId,
    /// Import path the file was loaded under (the root path for the root).
    pub path: String,
    pub source: String,
    /// Import alias -> imported file.
    pub namespaces: BTreeMap<String, FileId>,
    /// Local concept name -> concept.
    pub concepts: BTreeMap<String, ConceptId>,
    /// Local datasource name -> datasource.
    pub datasources: BTreeMap<String, DatasourceId>,
    /// Query statements declared in this file, in source order.
    pub queries: Vec<Spanned<QueryStmt>>,
}

/// Who a property or metric belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConceptOwner {
    Single(ConceptId),
    Composite(JointKeyId),
}

/// Synthetic identity for a set of keys that together own properties.
///
/// Members are sorted, so `<a.id, b.id>` and `<b.id, a.id>` are the same
/// joint key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JointKey {
    pub id: JointKeyId,
    pub members: Vec<ConceptId>,
}

#[derive(Debug, Clone)]
pub struct Concept {
    pub id: ConceptId,
    pub file: FileId,
    /// Name local to the declaring file.
    pub name: String,
    /// Shortest import path from the root file, e.g. `customer.id`.
    pub address: String,
    pub purpose: Purpose,
    pub data_type: Option<DataType>,
    pub owner: Option<ConceptOwner>,
    /// Derivation, resolved by name in the declaring file's scope.
    pub derivation: Option<Spanned<Expr>>,
    pub span: Span,
}

/// Physical location of a datasource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Address {
    Table {
        schema: Option<String>,
        name: String,
    },
    /// A file path read by the engine (`'data/orders.parquet'`).
    File(String),
    /// A pre-quoted identifier emitted verbatim.
    Raw(String),
}

impl Address {
    /// Build a table address from dotted segments; all but the last form
    /// the schema.
    pub fn from_segments(segments: &[String]) -> Self {
        match segments.split_last() {
            Some((name, [])) => Address::Table {
                schema: None,
                name: name.clone(),
            },
            Some((name, schema)) => Address::Table {
                schema: Some(schema.join(".")),
                name: name.clone(),
            },
            None => Address::Raw(String::new()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Table {
                schema: Some(schema),
                name,
            } => write!(f, "{}.{}", schema, name),
            Address::Table { schema: None, name } => write!(f, "{}", name),
            Address::File(path) => write!(f, "'{}'", path),
            Address::Raw(raw) => write!(f, "`{}`", raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnBinding {
    pub column: String,
    pub concept: ConceptId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Datasource {
    pub id: DatasourceId,
    pub file: FileId,
    pub name: String,
    pub address: Address,
    /// Column mappings in declaration order.
    pub columns: Vec<ColumnBinding>,
    /// Grain concepts, sorted by id.
    pub grain: Vec<ConceptId>,
    pub span: Span,
}

impl Datasource {
    pub fn column_for(&self, concept: ConceptId) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.concept == concept)
            .map(|c| c.column.as_str())
    }

    pub fn supplies(&self, concept: ConceptId) -> bool {
        self.columns.iter().any(|c| c.concept == concept)
    }
}

/// A bound, immutable model.
#[derive(Debug, Clone)]
pub struct Model {
    pub(crate) files: Vec<SourceFile>,
    pub(crate) concepts: Vec<Concept>,
    pub(crate) joint_keys: Vec<JointKey>,
    pub(crate) datasources: Vec<Datasource>,
    /// Edge `a -> b` labelled with the alias `a` imports `b` under.
    pub(crate) imports: DiGraph<FileId, String>,
    /// Edges between datasources sharing mapped key concepts.
    pub(crate) join_graph: UnGraph<DatasourceId, Vec<ConceptId>>,
    pub(crate) version: String,
}

impl Model {
    // ========================================================================
    // Tables
    // ========================================================================

    pub fn root(&self) -> FileId {
        FileId(0)
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn file(&self, id: FileId) -> &SourceFile {
        &self.files[id.0]
    }

    pub fn find_file(&self, path: &str) -> Option<FileId> {
        self.files.iter().find(|f| f.path == path).map(|f| f.id)
    }

    pub fn concepts(&self) -> &[Concept] {
        &self.concepts
    }

    pub fn concept(&self, id: ConceptId) -> &Concept {
        &self.concepts[id.0]
    }

    pub fn joint_keys(&self) -> &[JointKey] {
        &self.joint_keys
    }

    pub fn joint_key(&self, id: JointKeyId) -> &JointKey {
        &self.joint_keys[id.0]
    }

    pub fn datasources(&self) -> &[Datasource] {
        &self.datasources
    }

    pub fn datasource(&self, id: DatasourceId) -> &Datasource {
        &self.datasources[id.0]
    }

    /// SHA-256 over every loaded path and source text.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn import_graph(&self) -> &DiGraph<FileId, String> {
        &self.imports
    }

    pub fn join_graph(&self) -> &UnGraph<DatasourceId, Vec<ConceptId>> {
        &self.join_graph
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Resolve a dotted path in a file's scope. Leading segments walk import
    /// aliases; the last names a concept local to the file reached.
    pub fn lookup_concept(&self, file: FileId, path: &ConceptPath) -> Option<ConceptId> {
        let (name, namespaces) = path.segments.split_last()?;
        let mut scope = file;
        for ns in namespaces {
            scope = *self.file(scope).namespaces.get(ns)?;
        }
        self.file(scope).concepts.get(name).copied()
    }

    pub fn lookup_datasource(&self, file: FileId, name: &str) -> Option<DatasourceId> {
        self.file(file).datasources.get(name).copied()
    }

    /// Keys that determine a concept: a key is its own owner, a property or
    /// metric is owned by its single key or every member of its joint key.
    pub fn owner_keys(&self, id: ConceptId) -> Vec<ConceptId> {
        let concept = self.concept(id);
        if concept.purpose == Purpose::Key {
            return vec![id];
        }
        match concept.owner {
            Some(ConceptOwner::Single(key)) => vec![key],
            Some(ConceptOwner::Composite(joint)) => self.joint_key(joint).members.clone(),
            None => Vec::new(),
        }
    }

    /// Whether any datasource maps the concept to a column.
    pub fn is_mapped(&self, id: ConceptId) -> bool {
        self.datasources.iter().any(|ds| ds.supplies(id))
    }

    /// Datasources adjacent in the join graph, in declaration order.
    pub fn join_neighbors(&self, id: DatasourceId) -> Vec<DatasourceId> {
        let mut out: Vec<DatasourceId> = self
            .join_graph
            .neighbors(NodeIndex::new(id.0))
            .map(|n| self.join_graph[n])
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Key concepts mapped by both datasources.
    pub fn shared_keys(&self, a: DatasourceId, b: DatasourceId) -> Vec<ConceptId> {
        self.join_graph
            .find_edge(NodeIndex::new(a.0), NodeIndex::new(b.0))
            .map(|e| self.join_graph[e].clone())
            .unwrap_or_default()
    }

    /// Render a concept for messages.
    pub fn describe(&self, id: ConceptId) -> String {
        self.concept(id).address.clone()
    }

    /// Build the datasource join graph from the column mappings.
    pub(crate) fn build_join_graph(&mut self) {
        let mut graph = UnGraph::new_undirected();
        for ds in &self.datasources {
            graph.add_node(ds.id);
        }
        for (i, a) in self.datasources.iter().enumerate() {
            for b in &self.datasources[i + 1..] {
                let mut shared: Vec<ConceptId> = a
                    .columns
                    .iter()
                    .map(|c| c.concept)
                    .filter(|c| self.concepts[c.0].purpose == Purpose::Key && b.supplies(*c))
                    .collect();
                shared.sort();
                shared.dedup();
                if !shared.is_empty() {
                    graph.add_edge(NodeIndex::new(a.id.0), NodeIndex::new(b.id.0), shared);
                }
            }
        }
        self.join_graph = graph;
    }
}
