//! DAA Assist MCP server: entry point.

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio_util::sync::CancellationToken;

use daa_core::{BackendKind, InMemoryIndex};
use daa_mcp::protocol::ProtocolHandler;
use daa_mcp::tools::{tool_specs, ToolServices};
use daa_mcp::transport::StdioTransport;
use daa_mcp::ServerConfig;

#[derive(Parser)]
#[command(
    name = "daa-mcp",
    about = "MCP server for DAA Assist: student grades, schedules, and regulation retrieval",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server over stdio (default).
    Serve {
        /// Run every call as this user (overrides server.default_user).
        #[arg(long)]
        user: Option<String>,
    },

    /// Start MCP server over streamable HTTP.
    #[cfg(feature = "http")]
    ServeHttp {
        /// Listen address (host:port); defaults to server.addr.
        #[arg(long)]
        addr: Option<String>,

        /// Bearer token for authentication.
        /// Also reads from DAA_MCP_TOKEN env var.
        #[arg(long)]
        token: Option<String>,
    },

    /// Print server capabilities and tools as JSON.
    Info,

    /// Load the config and corpora and report what was found.
    CheckConfig,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   daa-mcp completions bash > ~/.local/share/bash-completion/completions/daa-mcp
    ///   daa-mcp completions zsh > ~/.zfunc/_daa-mcp
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

/// Services, sweeper and protocol handler shared by both transports.
struct Runtime {
    services: ToolServices,
    handler: Arc<ProtocolHandler>,
    shutdown: CancellationToken,
}

impl Runtime {
    fn start(config: &ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let services = ToolServices::from_config(config)?;
        let registry = services.registry(config.invocation_timeout())?;
        tracing::info!(
            "Portal: {} | retrieval backend: {} | {} tools",
            config.portal.base_url,
            services.retrieval.backend_name(),
            registry.len()
        );

        let shutdown = CancellationToken::new();
        services.sessions().spawn_sweeper(shutdown.clone());

        Ok(Self {
            services,
            handler: Arc::new(ProtocolHandler::new(registry)),
            shutdown,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Serve { user: None }) {
        Commands::Serve { user } => {
            let config = ServerConfig::resolve_and_load(cli.config.as_deref())?;
            let runtime = Runtime::start(&config)?;
            let caller = match user {
                Some(user) => Some(daa_mcp::tools::CallerIdentity::new(user, None)),
                None => config.default_caller(),
            };
            if caller.is_none() {
                tracing::warn!("No default user configured; portal tools will be rejected");
            }

            tracing::info!("DAA Assist MCP server (stdio)");
            let transport = StdioTransport::new(Arc::clone(&runtime.handler), caller);
            transport.run().await?;
            runtime.shutdown.cancel();
        }

        #[cfg(feature = "http")]
        Commands::ServeHttp { addr, token } => {
            use daa_mcp::transport::{HttpOptions, HttpTransport};

            let config = ServerConfig::resolve_and_load(cli.config.as_deref())?;
            let runtime = Runtime::start(&config)?;
            let addr = addr.unwrap_or_else(|| config.server.addr.clone());
            let token = config.effective_token(token);

            if token.is_some() {
                tracing::info!("Auth: bearer token required");
            }

            let transport = HttpTransport::new(
                Arc::clone(&runtime.handler),
                HttpOptions {
                    token,
                    default_user: config.server.default_user.clone(),
                    portal: Some(Arc::clone(runtime.services.sessions())),
                    session_idle_ttl: config.session_idle_ttl(),
                    ..HttpOptions::default()
                },
            );

            let shutdown = runtime.shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Ctrl-C received, shutting down");
                    shutdown.cancel();
                }
            });

            transport.run(&addr, runtime.shutdown.clone()).await?;
            runtime.handler.cancel_all();
        }

        Commands::Info => {
            let config = ServerConfig::resolve_and_load(cli.config.as_deref())?;
            let capabilities = daa_mcp::types::InitializeResult::default_result();
            let tools: Vec<_> = tool_specs(&config.retrieval)
                .iter()
                .map(|spec| spec.definition())
                .collect();
            let info = serde_json::json!({
                "server": capabilities.server_info,
                "protocol_version": capabilities.protocol_version,
                "capabilities": capabilities.capabilities,
                "tools": tools,
                "tool_count": tools.len(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::CheckConfig => {
            let config = ServerConfig::resolve_and_load(cli.config.as_deref())?;
            if let Err(e) = config.validate() {
                eprintln!("Invalid config: {e}");
                std::process::exit(1);
            }

            println!("Portal: {}", config.portal.base_url);
            println!("  Credential refs: {}", config.credentials.len());
            println!(
                "  Default user: {}",
                config.server.default_user.as_deref().unwrap_or("(none)")
            );
            match config.retrieval.backend {
                BackendKind::Memory => match InMemoryIndex::load_dir(&config.retrieval.corpus_dir) {
                    Ok(index) => {
                        println!(
                            "Retrieval: memory, {} chunks from {}",
                            index.len(),
                            config.retrieval.corpus_dir.display()
                        );
                        for (corpus, count) in index.corpora() {
                            println!("  {corpus}: {count}");
                        }
                    }
                    Err(e) => {
                        eprintln!("Invalid corpus: {e}");
                        std::process::exit(1);
                    }
                },
                BackendKind::Http => println!(
                    "Retrieval: http, endpoint {}",
                    config.retrieval.endpoint.as_deref().unwrap_or("(missing)")
                ),
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "daa-mcp", &mut std::io::stdout());
        }
    }

    Ok(())
}
