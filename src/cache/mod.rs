//! In-memory cache of compiled queries.
//!
//! Compiled queries are memoized per model version, so a re-bound model with
//! different sources never sees stale SQL.
//!
//! # Key Format
//!
//! ```text
//! (model version, dialect, planner options, query text) -> Arc<CompiledQuery>
//! ```
//!
//! The model version is the SHA-256 of every loaded path and source, see
//! [`hash_sources`].

mod hash;
pub use hash::{compute_hash, hash_sources};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::compile::{compile_query, CompileOptions, CompileResult};
use crate::model::Model;
use crate::planner::{CompiledQuery, PlannerOptions};
use crate::sql::Dialect;

/// Default entry limit when none is configured.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Cache key for one compiled query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub model_version: String,
    pub dialect: Dialect,
    pub planner: PlannerOptions,
    pub query: String,
}

impl CacheKey {
    pub fn new(model: &Model, options: &CompileOptions, query: &str) -> Self {
        Self {
            model_version: model.version().to_string(),
            dialect: options.dialect,
            planner: options.planner,
            query: query.to_string(),
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Concurrent memo of compiled queries.
///
/// Safe to share across threads; compilation happens outside any shard lock,
/// so two threads may compile the same query once each.
#[derive(Debug)]
pub struct QueryCache {
    entries: DashMap<CacheKey, Arc<CompiledQuery>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl QueryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<CompiledQuery>> {
        let found = self.entries.get(key).map(|entry| Arc::clone(entry.value()));
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Store a compiled query, evicting when full.
    ///
    /// Entries for other model versions go first; if that frees nothing the
    /// cache is cleared.
    pub fn insert(&self, key: CacheKey, query: CompiledQuery) -> Arc<CompiledQuery> {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            let version = key.model_version.clone();
            self.entries.retain(|k, _| k.model_version == version);
            if self.entries.len() >= self.max_entries {
                log::debug!(entries = self.entries.len(); "Query cache full, clearing");
                self.entries.clear();
            }
        }
        let query = Arc::new(query);
        self.entries.insert(key, Arc::clone(&query));
        query
    }

    /// Return the cached query or compile and store it.
    pub fn get_or_compile(
        &self,
        model: &Model,
        text: &str,
        options: &CompileOptions,
    ) -> CompileResult<Arc<CompiledQuery>> {
        let key = CacheKey::new(model, options, text);
        if let Some(hit) = self.get(&key) {
            log::trace!(dialect = options.dialect.to_string().as_str(); "Query cache hit");
            return Ok(hit);
        }
        let compiled = compile_query(model, text, options)?;
        Ok(self.insert(key, compiled))
    }

    /// Drop every entry compiled against `model_version`.
    pub fn invalidate_version(&self, model_version: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.model_version != model_version);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
