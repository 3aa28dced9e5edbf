//! `get_schedule` tool: the caller's weekly class schedule.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use daa_core::{CredentialStore, DaaScraper, ScrapeFilter};

use crate::types::ToolError;

use super::context::ToolContext;
use super::registry::{ToolHandler, ToolSpec};
use super::ScrapeParams;

pub const NAME: &str = "get_schedule";

pub fn spec() -> ToolSpec {
    ToolSpec {
        name: NAME,
        description: "Fetch the calling student's weekly class schedule from the DAA portal, \
                      ordered by weekday and period",
        input_schema: super::scrape_input_schema("2023-2"),
        output_schema: json!({
            "type": "object",
            "properties": {
                "count": { "type": "integer" },
                "entries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "term": { "type": "string" },
                            "course_code": { "type": "string" },
                            "course_name": { "type": "string" },
                            "weekday": { "type": "string", "enum": ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"] },
                            "start_period": { "type": "integer", "minimum": 1 },
                            "end_period": { "type": "integer", "minimum": 1 },
                            "room": { "type": "string" },
                            "instructor": { "type": ["string", "null"] },
                            "source_timestamp": { "type": "string", "format": "date-time" }
                        },
                        "required": ["term", "course_code", "weekday", "start_period", "end_period", "room"]
                    }
                }
            },
            "required": ["count", "entries"]
        }),
    }
}

pub struct GetSchedule {
    scraper: DaaScraper,
    credentials: Arc<dyn CredentialStore>,
}

impl GetSchedule {
    pub fn new(scraper: DaaScraper, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            scraper,
            credentials,
        }
    }
}

#[async_trait]
impl ToolHandler for GetSchedule {
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let params: ScrapeParams = super::parse_args(args)?;
        let (caller, credentials) = super::caller_credentials(&ctx, self.credentials.as_ref())?;
        let filter = ScrapeFilter::from(params);

        ctx.progress.report(0.0, Some(1.0), "fetching schedule from the portal");
        let entries = self
            .scraper
            .get_schedule(&caller.user_id, &credentials, &filter, &ctx.cancel)
            .await?;
        ctx.progress
            .report(1.0, Some(1.0), &format!("parsed {} schedule entries", entries.len()));

        Ok(json!({
            "count": entries.len(),
            "entries": entries,
        }))
    }
}
