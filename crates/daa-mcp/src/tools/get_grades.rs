//! `get_grades` tool: the caller's grade records from the DAA portal.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use daa_core::{CredentialStore, DaaScraper, ScrapeFilter};

use crate::types::ToolError;

use super::context::ToolContext;
use super::registry::{ToolHandler, ToolSpec};
use super::ScrapeParams;

pub const NAME: &str = "get_grades";

pub fn spec() -> ToolSpec {
    ToolSpec {
        name: NAME,
        description: "Fetch the calling student's grades from the DAA portal, optionally for a single term",
        input_schema: super::scrape_input_schema("2023-1"),
        output_schema: json!({
            "type": "object",
            "properties": {
                "count": { "type": "integer" },
                "records": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "term": { "type": "string" },
                            "course_code": { "type": "string" },
                            "course_name": { "type": "string" },
                            "credits": { "type": "integer" },
                            "score": { "type": ["number", "null"] },
                            "letter": { "type": ["string", "null"] },
                            "source_timestamp": { "type": "string", "format": "date-time" }
                        },
                        "required": ["term", "course_code", "course_name", "credits", "source_timestamp"]
                    }
                }
            },
            "required": ["count", "records"]
        }),
    }
}

pub struct GetGrades {
    scraper: DaaScraper,
    credentials: Arc<dyn CredentialStore>,
}

impl GetGrades {
    pub fn new(scraper: DaaScraper, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            scraper,
            credentials,
        }
    }
}

#[async_trait]
impl ToolHandler for GetGrades {
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let params: ScrapeParams = super::parse_args(args)?;
        let (caller, credentials) = super::caller_credentials(&ctx, self.credentials.as_ref())?;
        let filter = ScrapeFilter::from(params);

        ctx.progress.report(0.0, Some(1.0), "fetching grades from the portal");
        let records = self
            .scraper
            .get_grades(&caller.user_id, &credentials, &filter, &ctx.cancel)
            .await?;
        ctx.progress
            .report(1.0, Some(1.0), &format!("parsed {} grade records", records.len()));

        Ok(json!({
            "count": records.len(),
            "records": records,
        }))
    }
}
