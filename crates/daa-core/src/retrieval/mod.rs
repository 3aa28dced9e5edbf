//! Retrieval over regulation and curriculum corpora.
//!
//! The engine owns the query-to-ranked-result contract: it normalizes the
//! query, asks a [`RetrievalBackend`] for candidates, re-ranks them
//! deterministically, truncates to `top_k`, and caches the result.

pub mod backend;
pub mod memory;
pub mod similarity;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::config::{BackendKind, RetrievalConfig};
use crate::types::{Chunk, Corpus, DaaError, DaaResult};

pub use backend::{HttpBackend, RetrievalBackend};
pub use memory::InMemoryIndex;

/// Minimum number of candidates requested from the backend before re-ranking.
const MIN_CANDIDATES: usize = 20;

/// Trim, collapse whitespace, lowercase.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Order by descending score, then document id, then chunk offset.
pub fn rank(chunks: &mut [Chunk]) {
    chunks.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
            .then(a.offset.cmp(&b.offset))
            .then_with(|| a.corpus_id.cmp(&b.corpus_id))
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    corpus: String,
    query: String,
    top_k: usize,
}

struct CachedResult {
    chunks: Arc<Vec<Chunk>>,
    stored_at: Instant,
}

pub struct RetrievalEngine {
    backend: Arc<dyn RetrievalBackend>,
    config: RetrievalConfig,
    cache: DashMap<CacheKey, CachedResult>,
}

impl RetrievalEngine {
    pub fn new(backend: Arc<dyn RetrievalBackend>, config: RetrievalConfig) -> Self {
        Self {
            backend,
            config,
            cache: DashMap::new(),
        }
    }

    /// Build the engine with the backend selected in `config`.
    pub fn from_config(config: RetrievalConfig) -> DaaResult<Self> {
        let backend: Arc<dyn RetrievalBackend> = match config.backend {
            BackendKind::Memory => Arc::new(InMemoryIndex::load_dir(&config.corpus_dir)?),
            BackendKind::Http => {
                let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                    DaaError::Config("retrieval.endpoint is required for the http backend".to_string())
                })?;
                Arc::new(HttpBackend::new(
                    endpoint,
                    std::time::Duration::from_millis(config.timeout_ms),
                )?)
            }
        };
        Ok(Self::new(backend, config))
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Ranked passages for `query` from `corpus`, at most `top_k` of them.
    pub async fn retrieve(
        &self,
        query: &str,
        corpus: &Corpus,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> DaaResult<Vec<Chunk>> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return Err(DaaError::InvalidInput("query must not be empty".to_string()));
        }
        if top_k == 0 || top_k > self.config.max_top_k {
            return Err(DaaError::InvalidInput(format!(
                "top_k must be between 1 and {}",
                self.config.max_top_k
            )));
        }

        let key = CacheKey {
            corpus: corpus.id(),
            query: normalized,
            top_k,
        };
        if let Some(hit) = self.cached(&key) {
            tracing::debug!(corpus = %key.corpus, "Retrieval cache hit");
            return Ok(hit.as_ref().clone());
        }

        let limit = top_k.saturating_mul(3).max(MIN_CANDIDATES);
        let candidates = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DaaError::Cancelled),
            result = self.backend.search(&key.query, corpus, limit) => result?,
        };
        let fetched = candidates.len();

        let ranked = Arc::new(rerank(candidates, corpus, top_k));
        tracing::debug!(
            corpus = %key.corpus,
            backend = self.backend.name(),
            candidates = fetched,
            returned = ranked.len(),
            "Retrieval complete"
        );

        self.store(key, Arc::clone(&ranked));
        Ok(ranked.as_ref().clone())
    }

    fn cached(&self, key: &CacheKey) -> Option<Arc<Vec<Chunk>>> {
        let ttl = self.config.cache_ttl();
        let hit = self.cache.get(key).and_then(|entry| {
            (entry.stored_at.elapsed() < ttl).then(|| Arc::clone(&entry.chunks))
        });
        if hit.is_none() {
            self.cache.remove(key);
        }
        hit
    }

    fn store(&self, key: CacheKey, chunks: Arc<Vec<Chunk>>) {
        if self.config.cache_capacity == 0 {
            return;
        }
        if self.cache.len() >= self.config.cache_capacity {
            let ttl = self.config.cache_ttl();
            self.cache.retain(|_, v| v.stored_at.elapsed() < ttl);
        }
        if self.cache.len() >= self.config.cache_capacity {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|e| e.value().stored_at)
                .map(|e| e.key().clone());
            if let Some(oldest) = oldest {
                self.cache.remove(&oldest);
            }
        }
        self.cache.insert(
            key,
            CachedResult {
                chunks,
                stored_at: Instant::now(),
            },
        );
    }

    /// Number of cached query results.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Keep only candidates from `corpus` with finite scores, drop duplicates,
/// rank, and truncate.
fn rerank(candidates: Vec<Chunk>, corpus: &Corpus, top_k: usize) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    let mut kept: Vec<Chunk> = candidates
        .into_iter()
        .filter(|c| c.score.is_finite() && corpus.contains(&c.corpus_id))
        .filter(|c| seen.insert((c.corpus_id.clone(), c.doc_id.clone(), c.offset)))
        .collect();
    rank(&mut kept);
    kept.truncate(top_k);
    kept
}
