//! `retrieve_regulation` tool: ranked passages from university regulations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use daa_core::{Corpus, RetrievalConfig, RetrievalEngine};

use crate::types::ToolError;

use super::context::ToolContext;
use super::registry::{ToolHandler, ToolSpec};

pub const NAME: &str = "retrieve_regulation";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegulationParams {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

pub fn spec(config: &RetrievalConfig) -> ToolSpec {
    ToolSpec {
        name: NAME,
        description: "Search university academic regulations and return the most relevant \
                      passages with their source citations",
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Question or keywords to search for" },
                "top_k": super::top_k_schema(config)
            },
            "required": ["query"],
            "additionalProperties": false
        }),
        output_schema: super::chunks_output_schema(),
    }
}

pub struct RetrieveRegulation {
    engine: Arc<RetrievalEngine>,
}

impl RetrieveRegulation {
    pub fn new(engine: Arc<RetrievalEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ToolHandler for RetrieveRegulation {
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let params: RegulationParams = super::parse_args(args)?;
        let top_k = params.top_k.unwrap_or(self.engine.config().default_top_k);
        let corpus = Corpus::Regulation;

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
