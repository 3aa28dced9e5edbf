//! Core data types for portal records, retrieval chunks, and errors.

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// A single course grade scraped from the portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    pub term: String,
    pub course_code: String,
    pub course_name: String,
    pub credits: u32,
    /// Ten-point score; absent while the course is still in progress.
    pub score: Option<f32>,
    pub letter: Option<String>,
    pub source_timestamp: DateTime<Utc>,
}

/// A single weekly class slot scraped from the portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub term: String,
    pub course_code: String,
    pub course_name: String,
    pub weekday: Weekday,
    pub start_period: u8,
    pub end_period: u8,
    pub room: String,
    pub instructor: Option<String>,
    pub source_timestamp: DateTime<Utc>,
}

/// Optional filters forwarded to the portal and applied to parsed records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeFilter {
    pub term: Option<String>,
    pub major: Option<String>,
}

impl ScrapeFilter {
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(term) = &self.term {
            pairs.push(("term", term.clone()));
        }
        if let Some(major) = &self.major {
            pairs.push(("major", major.clone()));
        }
        pairs
    }

    pub(crate) fn matches_term(&self, term: &str) -> bool {
        self.term.as_deref().map_or(true, |t| t == term)
    }
}

/// Portal login credentials for one student.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Which corpus a retrieval query runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Corpus {
    Regulation,
    /// Curriculum for one major, or every curriculum corpus when `major` is `None`.
    Curriculum { major: Option<String> },
}

impl Corpus {
    /// Corpus identifier used by backends and returned on chunks.
    pub fn id(&self) -> String {
        match self {
            Corpus::Regulation => "regulation".to_string(),
            Corpus::Curriculum { major: Some(major) } => format!("curriculum/{major}"),
            Corpus::Curriculum { major: None } => "curriculum".to_string(),
        }
    }

    /// Whether a concrete corpus id (as stored by a backend) belongs to this selection.
    pub fn contains(&self, corpus_id: &str) -> bool {
        match self {
            Corpus::Regulation => corpus_id == "regulation",
            Corpus::Curriculum { major: Some(major) } => {
                corpus_id.strip_prefix("curriculum/") == Some(major.as_str())
            }
            Corpus::Curriculum { major: None } => {
                corpus_id == "curriculum" || corpus_id.starts_with("curriculum/")
            }
        }
    }
}

/// A ranked passage returned by the retrieval engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub corpus_id: String,
    pub doc_id: String,
    pub offset: u32,
    pub text: String,
    pub score: f32,
    /// Citation for the passage, e.g. "Decision 123/QD, Article 4".
    pub source: String,
}

/// Errors that can occur in the core library.
#[derive(thiserror::Error, Debug)]
pub enum DaaError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The portal refused an established session (401/403 or login redirect).
    #[error("Portal rejected the session")]
    SessionRejected,

    /// A single transient failure; retried before it ever reaches a caller.
    #[error("Portal unavailable: {0}")]
    PortalUnavailable(String),

    #[error("Upstream unavailable after {attempts} attempt(s): {message}")]
    UpstreamUnavailable { attempts: u32, message: String },

    #[error("Parse error in {variant} page: {message}")]
    Parse {
        variant: &'static str,
        message: String,
    },

    #[error("Retrieval backend error: {0}")]
    Retrieval(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaaError {
    pub(crate) fn parse(variant: &'static str, message: impl Into<String>) -> Self {
        DaaError::Parse {
            variant,
            message: message.into(),
        }
    }
}

/// Convenience result type.
pub type DaaResult<T> = Result<T, DaaError>;
