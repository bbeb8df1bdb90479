//! Loading a root file and everything it imports.
//!
//! Files are parsed once each and linked into an explicit import graph.
//! Parse diagnostics from every file are collected before failing; import
//! cycles of any length are reported with the full cycle path.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;

use super::error::BindError;
use super::resolver::SourceResolver;
use crate::dsl::{self, Diagnostic, Script, Span};

/// A parsed file in a program.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub path: String,
    pub source: String,
    pub script: Script,
}

/// Import edge label.
#[derive(Debug, Clone)]
pub struct ImportEdge {
    pub alias: String,
    pub span: Span,
}

/// All files reachable from a root, with the import graph between them.
///
/// Node `i` of `graph` is `files[i]`; file 0 is the root.
#[derive(Debug, Clone)]
pub struct Program {
    pub files: Vec<ParsedFile>,
    pub graph: DiGraph<usize, ImportEdge>,
    index: BTreeMap<String, usize>,
}

impl Program {
    /// File index for an import path.
    pub fn file_index(&self, path: &str) -> Option<usize> {
        self.index.get(path).copied()
    }

    /// File indices with every file after the files it imports.
    ///
    /// Only valid on an acyclic program, which [`load`] guarantees.
    pub fn dependency_order(&self) -> Vec<usize> {
        match toposort(&self.graph, None) {
            Ok(order) => order.into_iter().rev().map(|n| self.graph[n]).collect(),
            Err(_) => (0..self.files.len()).collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{} syntax error(s)", .0.len())]
    Syntax(Vec<Diagnostic>),

    #[error(transparent)]
    Bind(#[from] BindError),
}

struct ParentInfo {
    parent: NodeIndex,
    edge_idx: EdgeIndex,
}

/// Parse `root_source` and follow its imports through `resolver`.
pub fn load(
    root_path: &str,
    root_source: &str,
    resolver: &dyn SourceResolver,
) -> Result<Program, LoadError> {
    let mut files: Vec<ParsedFile> = Vec::new();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    let mut graph: DiGraph<usize, ImportEdge> = DiGraph::new();
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut queue: VecDeque<usize> = VecDeque::new();

    let mut add_file = |path: &str,
                        source: String,
                        files: &mut Vec<ParsedFile>,
                        graph: &mut DiGraph<usize, ImportEdge>|
     -> usize {
        let result = dsl::parse(&source);
        diagnostics.extend(result.diagnostics.into_iter().map(|d| d.with_file(path)));
        let idx = files.len();
        files.push(ParsedFile {
            path: path.to_string(),
            source,
            script: result.script.unwrap_or_default(),
        });
        graph.add_node(idx);
        idx
    };

    let root = add_file(root_path, root_source.to_string(), &mut files, &mut graph);
    index.insert(root_path.to_string(), root);
    queue.push_back(root);

    while let Some(current) = queue.pop_front() {
        let imports: Vec<_> = files[current].script.imports().cloned().collect();
        for import in imports {
            let target = match index.get(&import.path.value) {
                Some(&idx) => idx,
                None => {
                    let Some(source) = resolver.resolve(&import.path.value) else {
                        return Err(BindError::UnresolvedImport {
                            file: files[current].path.clone(),
                            path: import.path.value.clone(),
                            span: import.path.span.clone(),
                        }
                        .into());
                    };
                    log::debug!(import = import.path.value.as_str(); "Loaded import");
                    let idx = add_file(&import.path.value, source, &mut files, &mut graph);
                    index.insert(import.path.value.clone(), idx);
                    queue.push_back(idx);
                    idx
                }
            };
            graph.add_edge(
                NodeIndex::new(current),
                NodeIndex::new(target),
                ImportEdge {
                    alias: import.alias.value.clone(),
                    span: import.path.span.clone(),
                },
            );
        }
    }

    if !diagnostics.is_empty() {
        return Err(LoadError::Syntax(diagnostics));
    }

    if let Err(cycle) = toposort(&graph, None) {
        return Err(cycle_error(&files, &graph, cycle.node_id()).into());
    }

    log::debug!(files = files.len(); "Loaded program");
    Ok(Program {
        files,
        graph,
        index,
    })
}

/// Find the shortest cycle through `start` and describe it.
fn cycle_error(
    files: &[ParsedFile],
    graph: &DiGraph<usize, ImportEdge>,
    start: NodeIndex,
) -> BindError {
    let mut visited: HashSet<NodeIndex> = HashSet::new();
    let mut parents: HashMap<NodeIndex, ParentInfo> = HashMap::new();
    let mut queue: VecDeque<NodeIndex> = VecDeque::new();

    queue.push_back(start);
    visited.insert(start);

    let mut closing: Option<(NodeIndex, EdgeIndex)> = None;
    'search: while let Some(current) = queue.pop_front() {
        let mut edges: Vec<_> = graph.edges(current).collect();
        edges.sort_by_key(|e| e.id());
        for edge in edges {
            let next = edge.target();
            if next == start {
                closing = Some((current, edge.id()));
                break 'search;
            }
            if visited.insert(next) {
                parents.insert(
                    next,
                    ParentInfo {
                        parent: current,
                        edge_idx: edge.id(),
                    },
                );
                queue.push_back(next);
            }
        }
    }

    // Walk back from the node that closes the cycle
    let mut nodes = vec![start];
    let mut first_edge = None;
    if let Some((last, closing_edge)) = closing {
        let mut current = last;
        first_edge = Some(closing_edge);
        while current != start {
            nodes.push(current);
            match parents.get(&current) {
                Some(info) => {
                    first_edge = Some(info.edge_idx);
                    current = info.parent;
                }
                None => break,
            }
        }
        nodes.push(start);
    }
    nodes.reverse();

    let cycle: Vec<String> = nodes
        .iter()
        .map(|n| files[graph[*n]].path.clone())
        .collect();
    let span = first_edge
        .and_then(|e| graph.edge_weight(e))
        .map(|w| w.span.clone())
        .unwrap_or(0..0);

    BindError::CyclicImport {
        file: files[graph[start]].path.clone(),
        cycle,
        span,
    }
}
