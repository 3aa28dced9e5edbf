//! In-process index over corpus files on disk.
//!
//! Each `*.json` file in the corpus directory holds one corpus:
//!
//! ```json
//! { "corpus": "curriculum/cs",
//!   "chunks": [ { "doc_id": "cs-2023", "offset": 0, "text": "...", "source": "..." } ] }
//! ```

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::backend::RetrievalBackend;
use super::similarity::{cosine_similarity, norm, term_vector, TermVector};
use super::rank;
use crate::types::{Chunk, Corpus, DaaError, DaaResult};

#[derive(Debug, Deserialize)]
struct CorpusFile {
    corpus: String,
    chunks: Vec<ChunkRecord>,
}

#[derive(Debug, Deserialize)]
struct ChunkRecord {
    doc_id: String,
    offset: u32,
    text: String,
    source: String,
}

struct IndexedChunk {
    corpus_id: String,
    record: ChunkRecord,
    vector: TermVector,
    norm: f64,
}

/// Lexical index scored by cosine similarity over term frequencies.
#[derive(Default)]
pub struct InMemoryIndex {
    chunks: Vec<IndexedChunk>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` corpus file in `dir`, in file-name order.
    pub fn load_dir(dir: &Path) -> DaaResult<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            DaaError::Config(format!("Cannot read corpus dir {}: {e}", dir.display()))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut index = Self::new();
        for path in paths {
            let raw = std::fs::read_to_string(&path)?;
            let file: CorpusFile = serde_json::from_str(&raw).map_err(|e| {
                DaaError::Config(format!("Invalid corpus file {}: {e}", path.display()))
            })?;
            tracing::debug!(
                "Loaded corpus '{}' ({} chunks) from {}",
                file.corpus,
                file.chunks.len(),
                path.display()
            );
            for chunk in file.chunks {
                index.insert(&file.corpus, chunk.doc_id, chunk.offset, chunk.text, chunk.source);
            }
        }

        tracing::info!("Retrieval index: {} chunks from {}", index.len(), dir.display());
        Ok(index)
    }

    pub fn insert(
        &mut self,
        corpus_id: &str,
        doc_id: impl Into<String>,
        offset: u32,
        text: impl Into<String>,
        source: impl Into<String>,
    ) {
        let text = text.into();
        let vector = term_vector(&text);
        let norm = norm(&vector);
        self.chunks.push(IndexedChunk {
            corpus_id: corpus_id.to_string(),
            record: ChunkRecord {
                doc_id: doc_id.into(),
                offset,
                text,
                source: source.into(),
            },
            vector,
            norm,
        });
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Distinct corpus ids with their chunk counts, sorted by id.
    pub fn corpora(&self) -> Vec<(String, usize)> {
        let mut counts = std::collections::BTreeMap::new();
        for chunk in &self.chunks {
            *counts.entry(chunk.corpus_id.clone()).or_insert(0usize) += 1;
        }
        counts.into_iter().collect()
    }

    fn score_all(&self, query: &str, corpus: &Corpus) -> Vec<Chunk> {
        let qv = term_vector(query);
        let qn = norm(&qv);

        self.chunks
            .iter()
            .filter(|c| corpus.contains(&c.corpus_id))
            .map(|c| Chunk {
                corpus_id: c.corpus_id.clone(),
                doc_id: c.record.doc_id.clone(),
                offset: c.record.offset,
                text: c.record.text.clone(),
                score: cosine_similarity(&qv, qn, &c.vector, c.norm),
                source: c.record.source.clone(),
            })
            .filter(|c| c.score > 0.0)
            .collect()
    }
}

#[async_trait]
impl RetrievalBackend for InMemoryIndex {
    async fn search(&self, query: &str, corpus: &Corpus, limit: usize) -> DaaResult<Vec<Chunk>> {
        let mut matches = self.score_all(query, corpus);
        rank(&mut matches);
        matches.truncate(limit);
        Ok(matches)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
