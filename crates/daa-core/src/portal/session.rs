//! Per-user portal session lifecycle: login, reuse, invalidation, idle eviction.
//!
//! Sessions are cached in a `DashMap` keyed by user id. Each entry holds its
//! own async mutex, so acquisition for one user is serialized while unrelated
//! users proceed in parallel. A request that arrives while a login for the
//! same user is in flight waits on that user's mutex and then reuses the
//! freshly created session. A cached session is only reused for the portal
//! account it was logged in with.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::client::{PortalClient, RawPage};
use crate::config::PortalConfig;
use crate::types::{Credentials, DaaError, DaaResult};

/// An authenticated portal context for one user. Never mutated; a refresh
/// produces a new session.
#[derive(Debug)]
pub struct ScrapeSession {
    user_id: String,
    username: String,
    cookies: Vec<(String, String)>,
    created_at: Instant,
    expires_at: Instant,
}

impl ScrapeSession {
    pub fn new(
        user_id: &str,
        username: &str,
        cookies: Vec<(String, String)>,
        ttl: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            cookies,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Portal account the session was logged in with.
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Value for the `Cookie` request header.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

struct SessionSlot {
    session: Option<Arc<ScrapeSession>>,
    last_used: Instant,
}

impl SessionSlot {
    fn empty() -> Self {
        Self {
            session: None,
            last_used: Instant::now(),
        }
    }
}

/// Owns every portal session and every network call to the portal.
pub struct SessionManager {
    client: PortalClient,
    config: PortalConfig,
    slots: DashMap<String, Arc<Mutex<SessionSlot>>>,
    logins: AtomicU64,
}

impl SessionManager {
    pub fn new(config: PortalConfig) -> DaaResult<Self> {
        let client = PortalClient::new(&config)?;
        Ok(Self {
            client,
            config,
            slots: DashMap::new(),
            logins: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    /// Number of successful portal logins since startup.
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }

    /// Number of users with a cached slot, live or not.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of cached sessions that have not expired. Slots locked by an
    /// acquisition in progress are not counted.
    pub fn live_session_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| {
                entry.value().try_lock().is_ok_and(|guard| {
                    guard
                        .session
                        .as_ref()
                        .is_some_and(|session| !session.is_expired())
                })
            })
            .count()
    }

    fn slot(&self, user_id: &str) -> Arc<Mutex<SessionSlot>> {
        self.slots
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionSlot::empty())))
            .value()
            .clone()
    }

    /// Return a live session for `user_id`, logging in when none exists, the
    /// cached one has expired, or it belongs to a different portal account.
    pub async fn acquire(
        &self,
        user_id: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> DaaResult<Arc<ScrapeSession>> {
        let slot = self.slot(user_id);
        let mut guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DaaError::Cancelled),
            guard = slot.lock() => guard,
        };
        guard.last_used = Instant::now();

        if let Some(session) = &guard.session {
            if session.username() != credentials.username {
                tracing::info!(user = user_id, "Portal credentials changed; logging in again");
            } else if session.is_expired() {
                tracing::debug!(user = user_id, age = ?session.age(), "Portal session expired");
            } else {
                return Ok(session.clone());
            }
        }
        guard.session = None;

        let session = Arc::new(self.login(user_id, credentials, cancel).await?);
        guard.session = Some(session.clone());
        Ok(session)
    }

    /// Drop the cached session for `user_id`; the next `acquire` logs in again.
    pub async fn invalidate(&self, user_id: &str) {
        let Some(slot) = self.slots.get(user_id).map(|s| s.value().clone()) else {
            return;
        };
        let mut guard = slot.lock().await;
        if guard.session.take().is_some() {
            tracing::info!(user = user_id, "Portal session invalidated");
        }
    }

    /// Drop `session` only if it is still the cached one for its user, so a
    /// stale rejection cannot discard a session another task just created.
    pub async fn invalidate_session(&self, session: &Arc<ScrapeSession>) {
        let Some(slot) = self.slots.get(session.user_id()).map(|s| s.value().clone()) else {
            return;
        };
        let mut guard = slot.lock().await;
        let is_current = guard
            .session
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if is_current {
            guard.session = None;
            tracing::info!(user = session.user_id(), "Portal session invalidated");
        }
    }

    async fn login(
        &self,
        user_id: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> DaaResult<ScrapeSession> {
        tracing::debug!(user = user_id, "Logging in to portal");
        let cookies = self
            .with_retry("login", cancel, || self.client.login(credentials))
            .await?;
        self.logins.fetch_add(1, Ordering::Relaxed);
        tracing::info!(user = user_id, cookies = cookies.len(), "Portal login succeeded");
        Ok(ScrapeSession::new(
            user_id,
            &credentials.username,
            cookies,
            self.config.session_ttl(),
        ))
    }

    /// GET a portal page on behalf of `session`.
    pub async fn fetch(
        &self,
        session: &ScrapeSession,
        path: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> DaaResult<RawPage> {
        let cookie = session.cookie_header();
        self.with_retry(path, cancel, || self.client.get(path, query, &cookie))
            .await
    }

    /// Run `op` with bounded exponential backoff on transient portal failures.
    async fn with_retry<T, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> DaaResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DaaResult<T>>,
    {
        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DaaError::Cancelled),
                result = op() => result,
            };

            match result {
                Err(DaaError::PortalUnavailable(message)) => {
                    if attempt >= max_attempts {
                        tracing::warn!("Portal {what} failed after {attempt} attempt(s): {message}");
                        return Err(DaaError::UpstreamUnavailable {
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = self.config.backoff(attempt);
                    tracing::debug!("Portal {what} attempt {attempt} failed ({message}), retrying in {delay:?}");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(DaaError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return other,
            }
        }
    }

    /// Remove slots that are idle past `idle_ttl` and not in use.
    pub fn evict_idle(&self) -> usize {
        let idle_ttl = self.config.idle_ttl();
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(guard) => guard.last_used.elapsed() < idle_ttl,
                Err(_) => true,
            }
        });
        let evicted = before.saturating_sub(self.slots.len());
        if evicted > 0 {
            tracing::debug!("Evicted {evicted} idle portal session(s)");
        }
        evicted
    }

    /// Periodically evict idle sessions until `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = Duration::from_secs(manager.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.evict_idle();
                    }
                }
            }
        })
    }
}
