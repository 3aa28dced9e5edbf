//! Async HTTP client for the academic portal, wrapping reqwest.
//!
//! Each call is a single attempt. Failures are classified into the
//! `DaaError` taxonomy here; retry and session policy live in
//! [`SessionManager`](super::SessionManager).

use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, COOKIE, DATE, LOCATION, SET_COOKIE};
use reqwest::StatusCode;

use crate::config::PortalConfig;
use crate::types::{Credentials, DaaError, DaaResult};

/// Raw response body from a portal data page.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    /// Portal `Date` header when present, otherwise the time the response arrived.
    pub fetched_at: DateTime<Utc>,
}

impl RawPage {
    /// Build a page from a known body, e.g. a stored fixture.
    pub fn new(body: impl Into<String>, content_type: Option<&str>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            url: String::new(),
            status: 200,
            content_type: content_type.map(str::to_string),
            body: body.into(),
            fetched_at,
        }
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"))
            || self.body.trim_start().starts_with('{')
    }
}

/// HTTP client bound to one portal deployment.
#[derive(Clone)]
pub struct PortalClient {
    client: reqwest::Client,
    base_url: String,
    login_path: String,
}

impl PortalClient {
    /// Build a client. Redirects are not followed so session cookies and
    /// login redirects stay visible to the caller.
    pub fn new(config: &PortalConfig) -> DaaResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| DaaError::Config(format!("Failed to build portal HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            login_path: config.login_path.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Submit the login form and return the issued session cookies.
    pub async fn login(&self, credentials: &Credentials) -> DaaResult<Vec<(String, String)>> {
        let url = self.url(&self.login_path);
        let form = [
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];

        let resp = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| DaaError::PortalUnavailable(format!("login request failed: {e}")))?;

        let status = resp.status();
        if is_transient(status) {
            return Err(DaaError::PortalUnavailable(format!(
                "login returned HTTP {status}"
            )));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DaaError::AuthenticationFailed(
                "portal rejected the supplied credentials".to_string(),
            ));
        }
        if !(status.is_success() || status.is_redirection()) {
            return Err(DaaError::AuthenticationFailed(format!(
                "unexpected login response HTTP {status}"
            )));
        }

        let cookies: Vec<(String, String)> = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();

        if cookies.is_empty() {
            // The portal answers bad credentials with the login form again.
            return Err(DaaError::AuthenticationFailed(
                "portal did not issue a session cookie".to_string(),
            ));
        }

        Ok(cookies)
    }

    /// GET a data page with the given cookie header.
    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
        cookie_header: &str,
    ) -> DaaResult<RawPage> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .header(COOKIE, cookie_header)
            .send()
            .await
            .map_err(|e| DaaError::PortalUnavailable(format!("GET {path} failed: {e}")))?;

        let status = resp.status();
        if is_transient(status) {
            return Err(DaaError::PortalUnavailable(format!(
                "GET {path} returned HTTP {status}"
            )));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DaaError::SessionRejected);
        }
        if status.is_redirection() {
            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if location.contains(&self.login_path) {
                return Err(DaaError::SessionRejected);
            }
            return Err(DaaError::parse(
                "http",
                format!("unexpected redirect from {path} to '{location}'"),
            ));
        }
        if !status.is_success() {
            return Err(DaaError::parse(
                "http",
                format!("unexpected HTTP {status} from {path}"),
            ));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let fetched_at = resp
            .headers()
            .get(DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let final_url = resp.url().to_string();

        let body = resp
            .text()
            .await
            .map_err(|e| DaaError::PortalUnavailable(format!("reading {path} body failed: {e}")))?;

        Ok(RawPage {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
            fetched_at,
        })
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Extract `name=value` from a `Set-Cookie` header value.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
