//! Credential lookup for portal logins.

use std::collections::HashMap;

use crate::types::Credentials;

/// Resolves a caller's credential reference to portal login credentials.
pub trait CredentialStore: Send + Sync {
    fn resolve(&self, credential_ref: &str) -> Option<Credentials>;
}

/// Credentials held in memory, typically loaded from the server config.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    entries: HashMap<String, Credentials>,
}

impl StaticCredentialStore {
    pub fn new(entries: HashMap<String, Credentials>) -> Self {
        Self { entries }
    }

    pub fn insert(&mut self, credential_ref: impl Into<String>, credentials: Credentials) {
        self.entries.insert(credential_ref.into(), credentials);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for StaticCredentialStore {
    fn resolve(&self, credential_ref: &str) -> Option<Credentials> {
        self.entries.get(credential_ref).cloned()
    }
}
