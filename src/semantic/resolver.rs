//! Source resolution for `import` statements.
//!
//! The compiler never touches the filesystem on its own; every imported
//! path is handed to a [`SourceResolver`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Maps an import path (`sales.customer`) to source text.
pub trait SourceResolver {
    fn resolve(&self, path: &str) -> Option<String>;
}

/// Resolver backed by an in-memory map; used by editors and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResolver {
    sources: BTreeMap<String, String>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(path.into(), source.into());
    }
}

impl SourceResolver for InMemoryResolver {
    fn resolve(&self, path: &str) -> Option<String> {
        self.sources.get(path).cloned()
    }
}

/// Resolver that delegates to a closure.
pub struct FnResolver<F>(pub F);

impl<F> SourceResolver for FnResolver<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve(&self, path: &str) -> Option<String> {
        (self.0)(path)
    }
}

/// Errors from [`FsResolver::try_resolve`].
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no file for import `{path}` (searched {})", display_paths(.searched))]
    NotFound { path: String, searched: Vec<PathBuf> },

    #[error("failed to read {}: {source}", .file.display())]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolver that reads model files from a list of root directories.
///
/// Dots in an import path map to directories: `sales.customer` resolves to
/// `<root>/sales/customer.qry`. A path that already names a file (contains
/// `/` or ends with the extension) is used as-is relative to each root.
#[derive(Debug, Clone)]
pub struct FsResolver {
    roots: Vec<PathBuf>,
    extension: String,
}

impl FsResolver {
    pub fn new(roots: Vec<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            roots,
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    /// Relative file path for an import path.
    pub fn relative_path(&self, path: &str) -> PathBuf {
        let suffix = format!(".{}", self.extension);
        if path.contains('/') || path.ends_with(&suffix) {
            return PathBuf::from(path);
        }
        let mut rel: PathBuf = path.split('.').collect();
        rel.set_extension(&self.extension);
        rel
    }

    pub fn try_resolve(&self, path: &str) -> Result<String, ResolveError> {
        let rel = self.relative_path(path);
        let mut searched = Vec::new();
        for root in &self.roots {
            let candidate = root.join(&rel);
            if candidate.is_file() {
                log::trace!(import = path, file = candidate.display().to_string(); "Resolved import");
                return std::fs::read_to_string(&candidate).map_err(|source| ResolveError::Io {
                    file: candidate,
                    source,
                });
            }
            searched.push(candidate);
        }
        Err(ResolveError::NotFound {
            path: path.to_string(),
            searched,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl SourceResolver for FsResolver {
    fn resolve(&self, path: &str) -> Option<String> {
        match self.try_resolve(path) {
            Ok(source) => Some(source),
            Err(err) => {
                log::warn!(import = path; "{}", err);
                None
            }
        }
    }
}

/// Roots for resolving imports of a model file on disk: its own directory
/// first, then the configured roots.
pub fn roots_for_file(file: &Path, configured: &[PathBuf]) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(parent) = file.parent() {
        roots.push(parent.to_path_buf());
    }
    for root in configured {
        if !roots.contains(root) {
            roots.push(root.clone());
        }
    }
    roots
}
