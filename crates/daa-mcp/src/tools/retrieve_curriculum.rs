//! `retrieve_curriculum` tool: ranked passages from program curricula.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use daa_core::{Corpus, RetrievalConfig, RetrievalEngine};

use crate::types::ToolError;

use super::context::ToolContext;
use super::registry::{ToolHandler, ToolSpec};

pub const NAME: &str = "retrieve_curriculum";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CurriculumParams {
    query: String,
    #[serde(default)]
    major: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

pub fn spec(config: &RetrievalConfig) -> ToolSpec {
    ToolSpec {
        name: NAME,
        description: "Search program curricula (courses, credits, prerequisites) and return the \
                      most relevant passages. Restrict to one major, or omit it to search all.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Question or keywords to search for" },
                "major": {
                    "type": "string",
                    "description": "Major code, e.g. \"cs\"; all majors when omitted"
                },
                "top_k": super::top_k_schema(config)
            },
            "required": ["query"],
            "additionalProperties": false
        }),
        output_schema: super::chunks_output_schema(),
    }
}

pub struct RetrieveCurriculum {
    engine: Arc<RetrievalEngine>,
}

impl RetrieveCurriculum {
    pub fn new(engine: Arc<RetrievalEngine>) -> Self {
        Self { engine }
    }
}

/// Majors are matched case-insensitively; a blank major means all of them.
fn corpus_for(major: Option<String>) -> Corpus {
    let major = super::non_blank(major).map(|m| m.to_lowercase());
    Corpus::Curriculum { major }
}

#[async_trait]
impl ToolHandler for RetrieveCurriculum {
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let params: CurriculumParams = super::parse_args(args)?;
        let top_k = params.top_k.unwrap_or(self.engine.config().default_top_k);
        let corpus = corpus_for(params.major);

        let chunks = self
            .engine
            .retrieve(&params.query, &corpus, top_k, &ctx.cancel)
            .await?;
        ctx.progress
            .report(1.0, Some(1.0), &format!("{} passages found", chunks.len()));

        Ok(json!({
            "corpus": corpus.id(),
            "count": chunks.len(),
            "chunks": chunks,
        }))
    }
}
