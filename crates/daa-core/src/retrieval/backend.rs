//! Retrieval backends: the external index that supplies candidate passages.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Chunk, Corpus, DaaError, DaaResult};

/// Source of candidate passages with raw scores. The engine re-ranks and
/// truncates whatever a backend returns.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    async fn search(&self, query: &str, corpus: &Corpus, limit: usize) -> DaaResult<Vec<Chunk>>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    corpus: String,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    candidates: Vec<Chunk>,
}

/// Backend that queries a remote index over HTTP (`POST {endpoint}/search`).
pub struct HttpBackend {
    client: reqwest::Client,
    search_url: String,
}

impl HttpBackend {
    pub fn new(endpoint: &str, timeout: Duration) -> DaaResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DaaError::Config(format!("Failed to build retrieval HTTP client: {e}")))?;
        Ok(Self {
            client,
            search_url: format!("{}/search", endpoint.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl RetrievalBackend for HttpBackend {
    async fn search(&self, query: &str, corpus: &Corpus, limit: usize) -> DaaResult<Vec<Chunk>> {
        let body = SearchRequest {
            query,
            corpus: corpus.id(),
            limit,
        };

        let resp = self
            .client
            .post(&self.search_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DaaError::Retrieval(format!("search request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DaaError::Retrieval(format!("search returned HTTP {status}")));
        }

        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| DaaError::Retrieval(format!("invalid search response: {e}")))?;
        Ok(parsed.candidates)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
