//! Tunables for the portal client and the retrieval engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Portal endpoints, session lifetimes, and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub base_url: String,
    pub login_path: String,
    pub grades_path: String,
    pub schedule_path: String,
    pub timeout_ms: u64,
    /// Absolute lifetime of a portal session.
    pub session_ttl_secs: u64,
    /// Sessions unused for this long are evicted by the sweeper.
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_ms: u64,
    pub user_agent: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://daa.example.edu".to_string(),
            login_path: "/login".to_string(),
            grades_path: "/student/grades".to_string(),
            schedule_path: "/student/schedule".to_string(),
            timeout_ms: 10_000,
            session_ttl_secs: 20 * 60,
            idle_ttl_secs: 10 * 60,
            sweep_interval_secs: 60,
            retry_attempts: 3,
            retry_base_ms: 250,
            user_agent: concat!("daa-assist/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl PortalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    /// Backoff delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        Duration::from_millis(self.retry_base_ms.saturating_mul(1u64 << (retry - 1).min(16)))
    }
}

/// Which retrieval backend serves candidate passages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Http,
}

/// Retrieval backend selection, limits, and result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub backend: BackendKind,
    /// Directory of corpus JSON files for the memory backend.
    pub corpus_dir: PathBuf,
    /// Base URL of the external index for the http backend.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            corpus_dir: PathBuf::from("corpus"),
            endpoint: None,
            timeout_ms: 5_000,
            default_top_k: 5,
            max_top_k: 50,
            cache_ttl_secs: 300,
            cache_capacity: 512,
        }
    }
}

impl RetrievalConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
