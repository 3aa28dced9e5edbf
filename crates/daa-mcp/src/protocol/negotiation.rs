//! MCP capability negotiation during initialization.

use crate::types::{InitializeParams, InitializeResult, McpResult, MCP_VERSION, SUPPORTED_VERSIONS};

/// Client details recorded after negotiation.
#[derive(Debug, Clone, Default)]
pub struct NegotiatedCapabilities {
    pub client_name: Option<String>,
    pub protocol_version: Option<String>,
    pub initialized: bool,
}

impl NegotiatedCapabilities {
    /// Echo the client's protocol version when supported, else offer ours.
    pub fn negotiate(&mut self, params: InitializeParams) -> McpResult<InitializeResult> {
        let version = if SUPPORTED_VERSIONS.contains(&params.protocol_version.as_str()) {
            params.protocol_version.as_str()
        } else {
            tracing::warn!(
                "Client requested protocol version {}, server supports {}. Proceeding with server version.",
                params.protocol_version,
                MCP_VERSION
            );
            MCP_VERSION
        };

        tracing::info!(
            "Initialized with client: {} v{} (protocol {version})",
            params.client_info.name,
            params.client_info.version
        );

        self.client_name = Some(params.client_info.name.clone());
        self.protocol_version = Some(version.to_string());
        Ok(InitializeResult::for_version(version))
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
        tracing::info!("MCP handshake complete");
    }
}
