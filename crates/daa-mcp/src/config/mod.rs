//! Configuration loading and resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use daa_core::{Credentials, PortalConfig, RetrievalConfig, StaticCredentialStore};

use crate::tools::CallerIdentity;
use crate::types::{McpError, McpResult};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "DAA_MCP_CONFIG";
/// Environment variable overriding `server.token`.
pub const TOKEN_ENV: &str = "DAA_MCP_TOKEN";

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub addr: String,
    pub token: Option<String>,
    pub invocation_timeout_secs: u64,
    /// Identity for calls that carry none (stdio, or HTTP without `X-User-ID`).
    pub default_user: Option<String>,
    /// HTTP sessions with no request for this long are closed.
    pub session_idle_ttl_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3100".to_string(),
            token: None,
            invocation_timeout_secs: 30,
            default_user: None,
            session_idle_ttl_secs: 30 * 60,
        }
    }
}

/// The whole config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub portal: PortalConfig,
    pub retrieval: RetrievalConfig,
    /// Portal credentials keyed by credential reference.
    pub credentials: HashMap<String, Credentials>,
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> McpResult<Self> {
        toml::from_str(text).map_err(|e| McpError::Config(e.to_string()))
    }

    /// Load from `path`, resolving a relative corpus dir against the file's
    /// directory.
    pub fn load(path: &Path) -> McpResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| McpError::Config(format!("Cannot read {}: {e}", path.display())))?;
        let mut config: Self = toml::from_str(&text)
            .map_err(|e| McpError::Config(format!("{}: {e}", path.display())))?;

        if config.retrieval.corpus_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.retrieval.corpus_dir = parent.join(&config.retrieval.corpus_dir);
            }
        }
        Ok(config)
    }

    /// Load the resolved config file, or defaults when none exists.
    pub fn resolve_and_load(explicit: Option<&str>) -> McpResult<Self> {
        match resolve_config_path(explicit) {
            Some(path) => {
                tracing::info!("Config: {}", path.display());
                Self::load(&path)
            }
            None => {
                tracing::warn!("No config file found; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.server.invocation_timeout_secs)
    }

    pub fn session_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.server.session_idle_ttl_secs)
    }

    /// Bearer token: explicit flag > `DAA_MCP_TOKEN` > config file.
    pub fn effective_token(&self, flag: Option<String>) -> Option<String> {
        flag.or_else(|| std::env::var(TOKEN_ENV).ok())
            .or_else(|| self.server.token.clone())
            .filter(|t| !t.is_empty())
    }

    pub fn default_caller(&self) -> Option<CallerIdentity> {
        self.server
            .default_user
            .as_deref()
            .map(|user| CallerIdentity::new(user, None))
    }

    pub fn credential_store(&self) -> StaticCredentialStore {
        StaticCredentialStore::new(self.credentials.clone())
    }

    /// Reject settings that would fail later at first use.
    pub fn validate(&self) -> McpResult<()> {
        if self.portal.base_url.trim().is_empty() {
            return Err(McpError::Config("portal.base_url must be set".to_string()));
        }
        if self.retrieval.default_top_k == 0
            || self.retrieval.default_top_k > self.retrieval.max_top_k
        {
            return Err(McpError::Config(format!(
                "retrieval.default_top_k must be between 1 and max_top_k ({})",
                self.retrieval.max_top_k
            )));
        }
        if self.server.session_idle_ttl_secs == 0 {
            return Err(McpError::Config(
                "server.session_idle_ttl_secs must be positive".to_string(),
            ));
        }
        if self.server.invocation_timeout_secs == 0 {
            return Err(McpError::Config(
                "server.invocation_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve the config file: explicit > env > `./.daa-mcp/config.toml` >
/// `$HOME/.daa-mcp/config.toml`. An explicit or env path is returned even if
/// missing so that the read error names it.
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    let cwd_config = PathBuf::from(".daa-mcp/config.toml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()?;
    let home_config = PathBuf::from(home).join(".daa-mcp/config.toml");
    home_config.exists().then_some(home_config)
}
