//! Connection handlers for the Ripple server.
//!
//! Every WebSocket upgrade is turned into a transport by the shared
//! [`WebSocketTransportServer`]; the application reacts to new transports through
//! listeners registered once at startup.

use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    extract::{State, WebSocketUpgrade},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use dashmap::DashMap;
use ripple_transport::{
    serve_websocket, AxumWebSocket, ConnectionId, ServerTransport, TransportServer,
    WebSocketTransportServer,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Produces transports from upgraded sockets.
    pub server: WebSocketTransportServer<AxumWebSocket>,
    /// Open transports by ID.
    pub transports: Arc<DashMap<ConnectionId, Arc<ServerTransport>>>,
    /// Server configuration.
    pub config: Config,
    /// Upgrades admitted and not yet finished, counted against the connection limit.
    active: Arc<AtomicUsize>,
}

/// One admitted connection. Dropping it frees the slot.
#[derive(Debug)]
pub struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AppState {
    /// Create new app state with the application listeners registered.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let state = Self {
            server: WebSocketTransportServer::new(),
            transports: Arc::new(DashMap::new()),
            config,
            active: Arc::new(AtomicUsize::new(0)),
        };

        let transports = state.transports.clone();
        state
            .server
            .on_transport(move |transport| track(&transports, transport))
            .on_transport(instrument)
            .on_transport(echo);

        state
    }

    /// Claim a connection slot, or `None` if `max_connections` are already admitted.
    ///
    /// The slot is taken before the upgrade completes, so concurrent upgrades cannot
    /// overshoot the limit.
    pub fn try_reserve(&self) -> Option<ConnectionSlot> {
        let max = self.config.limits.max_connections;
        let admitted = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok();
        admitted.then(|| ConnectionSlot {
            active: self.active.clone(),
        })
    }
}

/// Keep `transport` in the registry until it closes.
fn track(
    transports: &Arc<DashMap<ConnectionId, Arc<ServerTransport>>>,
    transport: &Arc<ServerTransport>,
) {
    let id = transport.id().clone();
    transports.insert(id.clone(), transport.clone());

    let transports = transports.clone();
    transport.on_close(move || {
        transports.remove(&id);
    });
}

/// Record metrics and log errors for `transport`.
fn instrument(transport: &Arc<ServerTransport>) {
    metrics::record_open();

    let id = transport.id().clone();
    transport
        .on_text(|text| metrics::record_message(text.len(), "inbound"))
        .on_binary(|data| metrics::record_message(data.len(), "inbound"))
        .on_error(move |e| {
            warn!(transport = %id, error = %e, "Transport error");
            metrics::record_error();
        })
        .on_close(metrics::record_close);
}

/// Send every message back to its sender.
fn echo(transport: &Arc<ServerTransport>) {
    let (text_out, binary_out) = (transport.clone(), transport.clone());
    transport
        .on_text(move |text| {
            if text_out.send_text(text).is_ok() {
                metrics::record_message(text.len(), "outbound");
            }
        })
        .on_binary(move |data| {
            if binary_out.send_binary(data.clone()).is_ok() {
                metrics::record_message(data.len(), "outbound");
            }
        });
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = router(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Ripple server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "transports": state.transports.len(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    uri: Uri,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(slot) = state.try_reserve() else {
        warn!(uri = %uri, "Connection limit reached; refusing upgrade");
        metrics::record_rejected();
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    // A failed upgrade drops the callback, and the slot with it.
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            debug!(uri = %uri, "WebSocket upgraded");
            serve_websocket(&state.server, socket, uri.to_string()).await;
        })
}
