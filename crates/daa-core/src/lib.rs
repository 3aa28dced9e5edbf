//! DAA Assist core: academic portal sessions, grade and schedule scrapers,
//! and regulation/curriculum retrieval.

pub mod config;
pub mod portal;
pub mod retrieval;
pub mod scrape;
pub mod types;

pub use config::{BackendKind, PortalConfig, RetrievalConfig};
pub use portal::{CredentialStore, RawPage, ScrapeSession, SessionManager, StaticCredentialStore};
pub use retrieval::{normalize_query, InMemoryIndex, RetrievalBackend, RetrievalEngine};
pub use scrape::DaaScraper;
pub use types::*;
