//! MCP-style tool server binary.
//!
//! Serves the protocol session core over HTTP: the one-shot endpoint at
//! `POST /mcp` and the stream (SSE) endpoints at `GET /sse` +
//! `POST /messages`. Ships a small built-in tool set sufficient to exercise
//! the core; real deployments register their vendor tools the same way.

use clap::Parser;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use relay_mcp::auth::{AuthResolver, CREDENTIAL_ENV};
use relay_mcp::dispatch::RequestDispatcher;
use relay_mcp::error::ToolError;
use relay_mcp::registry::{ToolDescriptor, ToolHandler, ToolRegistry};
use relay_mcp::session::SessionManager;
use relay_mcp::transport::{McpService, TransportState};
use serde_json::json;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "relay-mcp", version, about = "MCP-style tool server")]
struct Cli {
    /// Bind address (e.g., 127.0.0.1:8765)
    #[arg(long, default_value = "127.0.0.1:8765")]
    bind: String,
    /// SSE keep-alive interval in seconds (0 disables)
    #[arg(long, default_value_t = 15)]
    sse_keep_alive_secs: u64,
    /// Idle timeout in seconds before stream sessions are evicted
    #[arg(long, default_value_t = 300)]
    idle_timeout_secs: u64,
    /// Stateless mode (POST only; no stream sessions)
    #[arg(long)]
    stateless: bool,
    /// Allowed Origin values (comma-separated). Defaults to localhost only.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "http://localhost,http://127.0.0.1"
    )]
    allow_origin: Vec<String>,
    /// Process-wide credential override for single-tenant deployments.
    /// Falls back to the RELAY_API_KEY environment variable.
    #[arg(long)]
    api_key: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay_mcp=info")),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_server(cli))
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

async fn run_server(args: Cli) -> anyhow::Result<()> {
    info!("Starting relay MCP server");

    let bind_addr: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;

    // Read once at startup; immutable afterwards.
    let override_credential = args
        .api_key
        .or_else(|| std::env::var(CREDENTIAL_ENV).ok());
    if override_credential.is_some() {
        info!("Using process-wide credential override for all requests");
    }

    let sessions = Arc::new(SessionManager::new(Duration::from_secs(
        args.idle_timeout_secs,
    )));
    let registry = build_registry(Arc::clone(&sessions))?;
    info!(tools = registry.len(), "Tool registry built");
    let dispatcher = RequestDispatcher::new(Arc::new(registry));

    let allowed_origins: HashSet<String> = args
        .allow_origin
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let state = TransportState {
        dispatcher,
        sessions: Arc::clone(&sessions),
        auth: AuthResolver::new(override_credential),
        keep_alive: if args.sse_keep_alive_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(args.sse_keep_alive_secs))
        },
        allowed_origins: Arc::new(allowed_origins),
        stateless: args.stateless,
    };
    let service = McpService::new(state);

    let cancel = CancellationToken::new();
    let sweeper = sessions.spawn_idle_sweeper(cancel.clone());

    let cancel_for_shutdown = cancel.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received");
            cancel_for_shutdown.cancel();
        }
    });

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed: {e}"))?;
    info!("Server listening on http://{bind_addr}");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Server shutting down");
                break;
            }
            res = listener.accept() => {
                let (stream, _) = res.map_err(|e| anyhow::anyhow!("accept failed: {e}"))?;
                let svc = service.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let conn = http1::Builder::new().serve_connection(
                        io,
                        TowerToHyperService::new(svc),
                    );
                    if let Err(err) = conn.await {
                        error!("http connection error: {err}");
                    }
                });
            }
        }
    }

    sessions.shutdown_all().await;
    let _ = sweeper.await;
    info!("Server stopped");
    Ok(())
}

/// Register the built-in tool set.
fn build_registry(sessions: Arc<SessionManager>) -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    let echo: ToolHandler = Arc::new(|args, _auth| Box::pin(async move { Ok(args) }));
    registry.register(ToolDescriptor::new(
        "echo",
        "Echo the provided text back to the caller",
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"],
        }),
        echo,
    )?)?;

    let whoami: ToolHandler = Arc::new(|_args, auth| {
        Box::pin(async move {
            // Reports the credential *source* only; the value never leaves
            // the dispatch path.
            Ok(json!({
                "source": auth.source(),
                "diagnostic": auth.diagnostic(),
            }))
        })
    });
    registry.register(ToolDescriptor::new(
        "whoami",
        "Report how the caller's credential was resolved (never its value)",
        json!({"type": "object"}),
        whoami,
    )?)?;

    let info_sessions = sessions;
    let server_info: ToolHandler = Arc::new(move |_args, auth| {
        let sessions = Arc::clone(&info_sessions);
        Box::pin(async move {
            if auth.credential().is_none() {
                return Err(ToolError::MissingCredential(
                    "server_info requires a credential".to_string(),
                ));
            }
            let stats = sessions.stats().await;
            Ok(json!({
                "server": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "sessions": stats,
            }))
        })
    });
    registry.register(ToolDescriptor::new(
        "server_info",
        "Server name, version, and session statistics (requires a credential)",
        json!({"type": "object"}),
        server_info,
    )?)?;

    Ok(registry)
}
