//! Status listener: answers every request on `port + 1` with the address of
//! the real backend. It is a locator only and never relays traffic.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::LaunchConfig;
use crate::error::LauncherError;

/// Port the listener uses for a given backend port.
pub fn status_port(backend_port: u16) -> Result<u16, LauncherError> {
    backend_port
        .checked_add(1)
        .ok_or(LauncherError::StatusPortOutOfRange { port: backend_port })
}

/// Body returned for every request.
pub fn locator_message(backend_url: &str) -> String {
    format!("Please use the MCP server directly at {}", backend_url)
}

/// Router answering any method and path with `404` and [`locator_message`].
pub fn router(backend_url: &str) -> Router {
    let message: Arc<str> = locator_message(backend_url).into();
    Router::new()
        .fallback(locate_backend)
        .layer(TraceLayer::new_for_http())
        .with_state(message)
}

/// Any request → 404 with the backend address
async fn locate_backend(
    State(message): State<Arc<str>>,
    method: Method,
    uri: Uri,
) -> (StatusCode, String) {
    tracing::debug!("Status listener: {} {} → {}", method, uri, message);
    (StatusCode::NOT_FOUND, message.to_string())
}

/// Bound status socket (`ListenerBinding`).
pub struct StatusListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    backend_port: u16,
    backend_url: String,
}

impl StatusListener {
    /// Bind at `config.port + 1`. Failing here breaks the dual-port contract and is fatal.
    pub async fn bind(host: IpAddr, config: &LaunchConfig) -> Result<Self, LauncherError> {
        let port = status_port(config.port)?;
        let addr = SocketAddr::new(host, port);

        let listener = TcpListener::bind(addr).await.map_err(|e| LauncherError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| LauncherError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        tracing::info!("Status listener bound on http://{}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            backend_port: config.port,
            backend_url: config.backend_url(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn backend_port(&self) -> u16 {
        self.backend_port
    }

    /// Serve until `shutdown` is cancelled. The socket is closed on return.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), LauncherError> {
        axum::serve(self.listener, router(&self.backend_url))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(LauncherError::Serve)?;
        tracing::info!("Status listener on {} closed", self.local_addr);
        Ok(())
    }
}

// ─── Banner ──────────────────────────────────────────────────

/// One-time operator banner shown once the listener is up.
pub fn banner(config: &LaunchConfig) -> String {
    let base = config.backend_url();
    let client_config = json!({
        "mcpServers": {
            "venice-ai": { "url": base }
        }
    });
    let client_config = serde_json::to_string_pretty(&client_config).unwrap_or_default();

    let mut lines = vec![
        String::new(),
        "Venice AI Images MCP Server is running!".to_string(),
        String::new(),
        format!("  - MCP Server URL: {}", base),
        format!("  - MCP Tools List: {}/mcp/tools/list", base),
        format!("  - MCP Tools Call: {}/mcp/tools/call", base),
        String::new(),
        "Claude Desktop Configuration:".to_string(),
    ];
    lines.extend(client_config.lines().map(|l| format!("  {}", l)));
    lines.push(String::new());

    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) + 2;
    let mut out = format!("╔{}╗\n", "═".repeat(width));
    for line in &lines {
        let pad = width - 1 - line.chars().count();
        out.push_str(&format!("║ {}{}║\n", line, " ".repeat(pad)));
    }
    out.push_str(&format!("╚{}╝", "═".repeat(width)));
    out
}
