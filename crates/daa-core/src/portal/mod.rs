//! Academic portal access: HTTP client, credentials, and session management.

pub mod client;
pub mod credentials;
pub mod session;

pub use client::{PortalClient, RawPage};
pub use credentials::{CredentialStore, StaticCredentialStore};
pub use session::{ScrapeSession, SessionManager};
