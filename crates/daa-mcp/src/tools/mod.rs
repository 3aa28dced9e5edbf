//! MCP tool implementations.

pub mod context;
pub mod get_grades;
pub mod get_schedule;
pub mod registry;
pub mod retrieve_curriculum;
pub mod retrieve_regulation;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use daa_core::{
    CredentialStore, Credentials, DaaScraper, RetrievalConfig, RetrievalEngine, ScrapeFilter,
    SessionManager,
};

use crate::config::ServerConfig;
use crate::types::{McpResult, ToolError};

pub use context::{CallerIdentity, ProgressReporter, ToolContext};
pub use registry::{InvocationState, ToolHandler, ToolInvocation, ToolRegistry, ToolSpec};

/// Shared backends the tool handlers run against.
#[derive(Clone)]
pub struct ToolServices {
    pub scraper: DaaScraper,
    pub credentials: Arc<dyn CredentialStore>,
    pub retrieval: Arc<RetrievalEngine>,
}

impl ToolServices {
    /// Portal session manager, credential store and retrieval engine from config.
    pub fn from_config(config: &ServerConfig) -> McpResult<Self> {
        let sessions = Arc::new(SessionManager::new(config.portal.clone())?);
        let retrieval = Arc::new(RetrievalEngine::from_config(config.retrieval.clone())?);
        Ok(Self {
            scraper: DaaScraper::new(sessions),
            credentials: Arc::new(config.credential_store()),
            retrieval,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.scraper.sessions()
    }

    /// Registry with all four DAA tools.
    pub fn registry(&self, timeout: Duration) -> McpResult<ToolRegistry> {
        let mut registry = ToolRegistry::new(timeout);
        let retrieval_config = self.retrieval.config();

        registry.register(
            get_grades::spec(),
            Arc::new(get_grades::GetGrades::new(
                self.scraper.clone(),
                Arc::clone(&self.credentials),
            )),
        )?;
        registry.register(
            get_schedule::spec(),
            Arc::new(get_schedule::GetSchedule::new(
                self.scraper.clone(),
                Arc::clone(&self.credentials),
            )),
        )?;
        registry.register(
            retrieve_regulation::spec(retrieval_config),
            Arc::new(retrieve_regulation::RetrieveRegulation::new(Arc::clone(
                &self.retrieval,
            ))),
        )?;
        registry.register(
            retrieve_curriculum::spec(retrieval_config),
            Arc::new(retrieve_curriculum::RetrieveCurriculum::new(Arc::clone(
                &self.retrieval,
            ))),
        )?;

        Ok(registry)
    }
}

/// Tool specs without any backend, for `info` output.
pub fn tool_specs(retrieval: &RetrievalConfig) -> Vec<ToolSpec> {
    vec![
        get_grades::spec(),
        get_schedule::spec(),
        retrieve_regulation::spec(retrieval),
        retrieve_curriculum::spec(retrieval),
    ]
}

/// The caller and their stored portal credentials. Scraper tools cannot run
/// anonymously.
fn caller_credentials(
    ctx: &ToolContext,
    store: &dyn CredentialStore,
) -> Result<(CallerIdentity, Credentials), ToolError> {
    let caller = ctx
        .caller
        .clone()
        .ok_or_else(|| ToolError::authentication("no caller identity supplied"))?;
    let credentials = store.resolve(&caller.credential_ref).ok_or_else(|| {
        ToolError::authentication(format!(
            "no portal credentials configured for reference '{}'",
            caller.credential_ref
        ))
    })?;
    Ok((caller, credentials))
}

/// Typed arguments of a call whose JSON already passed the tool's input schema.
fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::invalid_arguments(e.to_string()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Optional portal filters shared by the scraper tools.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScrapeParams {
    #[serde(default)]
    term: Option<String>,
    #[serde(default)]
    major: Option<String>,
}

impl From<ScrapeParams> for ScrapeFilter {
    fn from(params: ScrapeParams) -> Self {
        ScrapeFilter {
            term: non_blank(params.term),
            major: non_blank(params.major),
        }
    }
}

fn scrape_input_schema(term_example: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "term": {
                "type": "string",
                "description": format!("Academic term code, e.g. \"{term_example}\"")
            },
            "major": { "type": "string", "description": "Major code forwarded to the portal" }
        },
        "additionalProperties": false
    })
}

fn top_k_schema(config: &RetrievalConfig) -> Value {
    json!({
        "type": "integer",
        "description": "Maximum number of passages to return",
        "minimum": 1,
        "maximum": config.max_top_k,
        "default": config.default_top_k
    })
}

fn chunks_output_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "corpus": { "type": "string" },
            "count": { "type": "integer" },
            "chunks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "corpus_id": { "type": "string" },
                        "doc_id": { "type": "string" },
                        "offset": { "type": "integer" },
                        "text": { "type": "string" },
                        "score": { "type": "number" },
                        "source": { "type": "string" }
                    },
                    "required": ["corpus_id", "doc_id", "offset", "text", "score", "source"]
                }
            }
        },
        "required": ["corpus", "count", "chunks"]
    })
}
