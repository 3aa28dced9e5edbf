//! DAA scrapers: fetch grade and schedule pages and parse them into records.

pub mod grades;
pub mod schedule;
pub mod variant;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::portal::{RawPage, SessionManager};
use crate::types::{Credentials, DaaError, DaaResult, GradeRecord, ScheduleEntry, ScrapeFilter};

pub use grades::parse_grades;
pub use schedule::parse_schedule;
pub use variant::{detect, PageVariant};

/// Scrapes portal data pages through the shared [`SessionManager`].
#[derive(Clone)]
pub struct DaaScraper {
    sessions: Arc<SessionManager>,
}

impl DaaScraper {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Fetch the user's grades, optionally restricted to one term.
    pub async fn get_grades(
        &self,
        user_id: &str,
        credentials: &Credentials,
        filter: &ScrapeFilter,
        cancel: &CancellationToken,
    ) -> DaaResult<Vec<GradeRecord>> {
        let path = self.sessions.config().grades_path.clone();
        let mut records = self
            .fetch_parsed(user_id, credentials, &path, filter, cancel, parse_grades)
            .await?;
        records.retain(|r| filter.matches_term(&r.term));
        tracing::debug!(user = user_id, count = records.len(), "Parsed grade records");
        Ok(records)
    }

    /// Fetch the user's weekly schedule, ordered by day and period.
    pub async fn get_schedule(
        &self,
        user_id: &str,
        credentials: &Credentials,
        filter: &ScrapeFilter,
        cancel: &CancellationToken,
    ) -> DaaResult<Vec<ScheduleEntry>> {
        let path = self.sessions.config().schedule_path.clone();
        let mut entries = self
            .fetch_parsed(user_id, credentials, &path, filter, cancel, parse_schedule)
            .await?;
        entries.retain(|e| filter.matches_term(&e.term));
        tracing::debug!(user = user_id, count = entries.len(), "Parsed schedule entries");
        Ok(entries)
    }

    /// Acquire, fetch, parse. A rejected session is invalidated and the whole
    /// sequence retried once with a fresh login.
    async fn fetch_parsed<T>(
        &self,
        user_id: &str,
        credentials: &Credentials,
        path: &str,
        filter: &ScrapeFilter,
        cancel: &CancellationToken,
        parse: fn(&RawPage) -> DaaResult<T>,
    ) -> DaaResult<T> {
        let query = filter.query_pairs();
        let mut relogged = false;

        loop {
            let session = self.sessions.acquire(user_id, credentials, cancel).await?;
            let outcome = match self.sessions.fetch(&session, path, &query, cancel).await {
                Ok(page) => parse(&page),
                Err(e) => Err(e),
            };

            match outcome {
                Err(DaaError::SessionRejected) if !relogged => {
                    tracing::info!(user = user_id, path, "Portal rejected session, logging in again");
                    self.sessions.invalidate_session(&session).await;
                    relogged = true;
                }
                Err(DaaError::SessionRejected) => {
                    self.sessions.invalidate_session(&session).await;
                    return Err(DaaError::AuthenticationFailed(
                        "portal rejected a freshly created session".to_string(),
                    ));
                }
                Ok(_) if cancel.is_cancelled() => return Err(DaaError::Cancelled),
                other => return other,
            }
        }
    }
}
