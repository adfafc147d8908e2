//! TCP transport for the MCP tool surface.
//!
//! Newline-delimited JSON-RPC: one JSON object per line in both directions,
//! framed with `LinesCodec`. Each accepted connection runs in its own task,
//! holds a lifecycle in-flight guard, and exits on EOF, on a codec error, or
//! when shutdown is signalled.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use super::protocol::{JsonRpcRequest, JsonRpcResponse, PARSE_ERROR};
use super::tools::ToolRouter;
use crate::network::lifecycle::Lifecycle;

/// MCP listener configuration.
#[derive(Debug, Clone)]
pub struct McpConfig {
    /// Bind address.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Maximum accepted frame length in bytes.
    pub max_frame_bytes: usize,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            max_frame_bytes: 1024 * 1024,
        }
    }
}

/// MCP tool server lifecycle: `new() -> start() -> serve()`.
pub struct McpModule {
    config: McpConfig,
    router: Arc<ToolRouter>,
    lifecycle: Arc<Lifecycle>,
    listener: Option<TcpListener>,
}

impl McpModule {
    #[must_use]
    pub fn new(config: McpConfig, router: Arc<ToolRouter>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            config,
            router,
            lifecycle,
            listener: None,
        }
    }

    /// Binds the listener and returns the actual port.
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "mcp listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Accepts connections until shutdown is signalled.
    ///
    /// # Errors
    ///
    /// Returns an error on a fatal accept failure.
    ///
    /// # Panics
    ///
    /// Panics when `start()` was not called first.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = self
            .listener
            .expect("start() must be called before serve()");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let router = Arc::clone(&self.router);
                    let lifecycle = Arc::clone(&self.lifecycle);
                    let conn_shutdown = shutdown.clone();
                    let max_frame = self.config.max_frame_bytes;
                    tokio::spawn(async move {
                        let _guard = lifecycle.in_flight_guard();
                        handle_connection(stream, peer, router, conn_shutdown, max_frame).await;
                    });
                }
            }
        }

        info!("mcp listener closed");
        Ok(())
    }
}

/// Serves one connection until EOF, error, or shutdown.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<ToolRouter>,
    mut shutdown: watch::Receiver<bool>,
    max_frame_bytes: usize,
) {
    debug!(%peer, "mcp connection opened");
    let mut framed = Framed::new(
        stream,
        LinesCodec::new_with_max_length(max_frame_bytes),
    );

    loop {
        let line = tokio::select! {
            _ = shutdown.changed() => break,
            line = framed.next() => line,
        };
        let Some(line) = line else {
            break; // EOF
        };
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(%peer, error = %e, "mcp frame error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => router.handle(request).await,
            Err(e) => Some(JsonRpcResponse::failure(
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {e}"),
            )),
        };

        if let Some(response) = response {
            let encoded = match serde_json::to_string(&response) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!(%peer, error = %e, "mcp response encoding failed");
                    continue;
                }
            };
            if let Err(e) = framed.send(encoded).await {
                warn!(%peer, error = %e, "mcp send failed");
                break;
            }
        }
    }
    debug!(%peer, "mcp connection closed");
}
