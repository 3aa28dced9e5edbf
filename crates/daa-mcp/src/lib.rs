//! DAA Assist MCP server: portal grades and schedules plus regulation and
//! curriculum retrieval, exposed as MCP tools over stdio or streamable HTTP.

pub mod config;
pub mod protocol;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::{resolve_config_path, ServerConfig};
pub use protocol::{ProtocolHandler, RequestContext};
pub use tools::{ToolRegistry, ToolServices};
pub use transport::StdioTransport;
#[cfg(feature = "http")]
pub use transport::{HttpOptions, HttpTransport};
