//! [`ServerWebSocket`] over axum's WebSocket upgrade.
//!
//! The socket is split in two: an [`AxumWebSocket`] handle that queues outbound frames
//! and holds listener registrations, and a [`WebSocketDriver`] that owns the actual
//! stream. Run the driver only after the handle has been accepted by a
//! [`TransportServer`], so every frame is read after the transport is wired.
//!
//! ```rust,ignore
//! async fn ws_handler(ws: WebSocketUpgrade, uri: Uri, State(server): State<Arc<Server>>) -> impl IntoResponse {
//!     ws.on_upgrade(move |socket| async move {
//!         serve_websocket(&*server, socket, uri.to_string()).await
//!     })
//! }
//! ```

use crate::traits::{TransportError, TransportServer};
use crate::transport::TransportEvents;
use crate::websocket::ServerWebSocket;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// How long the driver waits for the peer to answer a server-initiated close.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to an upgraded axum WebSocket.
pub struct AxumWebSocket {
    uri: String,
    outbound: mpsc::UnboundedSender<Message>,
    events: Arc<TransportEvents>,
}

/// Pumps frames between an axum WebSocket and its [`AxumWebSocket`] handle.
pub struct WebSocketDriver {
    socket: WebSocket,
    outbound: mpsc::UnboundedReceiver<Message>,
    events: Arc<TransportEvents>,
    uri: String,
    close_timeout: Duration,
}

impl AxumWebSocket {
    /// Split an upgraded socket into its handle and driver.
    #[must_use]
    pub fn new(socket: WebSocket, uri: impl Into<String>) -> (Self, WebSocketDriver) {
        let uri = uri.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let events = Arc::new(TransportEvents::new());

        let handle = Self {
            uri: uri.clone(),
            outbound: tx,
            events: events.clone(),
        };
        let driver = WebSocketDriver {
            socket,
            outbound: rx,
            events,
            uri,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        };
        (handle, driver)
    }

    fn queue(&self, message: Message) {
        if self.outbound.send(message).is_err() {
            debug!(uri = %self.uri, "WebSocket driver stopped; dropping frame");
        }
    }
}

impl ServerWebSocket for AxumWebSocket {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn send_text(&self, data: String) {
        self.queue(Message::Text(data));
    }

    fn send_binary(&self, data: Bytes) {
        self.queue(Message::Binary(data.to_vec()));
    }

    fn close(&self) {
        self.queue(Message::Close(None));
    }

    fn on_error<F>(&self, listener: F) -> &Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.events.on_error(listener);
        self
    }

    fn on_close<F>(&self, listener: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.on_close(listener);
        self
    }

    fn on_text<F>(&self, listener: F) -> &Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events.on_text(listener);
        self
    }

    fn on_binary<F>(&self, listener: F) -> &Self
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.events.on_binary(listener);
        self
    }
}

impl WebSocketDriver {
    /// Bound the wait for the peer's reply after the server sends a close frame.
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Run until the connection ends, then fire the close event.
    ///
    /// The connection ends on a close frame from the peer, a read or write failure
    /// (reported as an error event first), or when the handle is dropped. After the
    /// server sends its own close frame, inbound frames are still drained until the
    /// peer answers or the close timeout elapses.
    pub async fn run(self) {
        let Self {
            socket,
            mut outbound,
            events,
            uri,
            close_timeout,
        } = self;
        let (mut sink, mut stream) = socket.split();
        let mut close_deadline: Option<Instant> = None;

        debug!(uri = %uri, "WebSocket driver started");

        loop {
            tokio::select! {
                message = outbound.recv(), if close_deadline.is_none() => {
                    let Some(message) = message else {
                        debug!(uri = %uri, "WebSocket handle dropped");
                        break;
                    };
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = sink.send(message).await {
                        warn!(uri = %uri, error = %e, "WebSocket write failed");
                        events.fire_error(TransportError::SendFailed(e.to_string()));
                        break;
                    }
                    if closing {
                        trace!(uri = %uri, "Close frame sent; awaiting reply");
                        close_deadline = Some(Instant::now() + close_timeout);
                    }
                }

                _ = time::sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                    debug!(uri = %uri, "Peer did not answer close frame");
                    break;
                }

                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            trace!(uri = %uri, len = text.len(), "Text frame");
                            events.fire_text(text);
                        }
                        Some(Ok(Message::Binary(data))) => {
                            trace!(uri = %uri, len = data.len(), "Binary frame");
                            events.fire_binary(Bytes::from(data));
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            // Answered by the WebSocket layer
                        }
                        Some(Ok(Message::Close(_))) => {
                            debug!(uri = %uri, "Received close frame");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(uri = %uri, error = %e, "WebSocket read failed");
                            events.fire_error(TransportError::ReceiveFailed(e.to_string()));
                            break;
                        }
                        None => {
                            debug!(uri = %uri, "WebSocket stream ended");
                            break;
                        }
                    }
                }
            }
        }

        // Completes the closing handshake if the peer started it. A peer that stopped
        // reading can stall the flush, so this is bounded too.
        match time::timeout(close_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(uri = %uri, error = %e, "WebSocket already closed"),
            Err(_) => debug!(uri = %uri, "Timed out closing WebSocket sink"),
        }

        events.fire_close();
        debug!(uri = %uri, "WebSocket driver stopped");
    }
}

/// Hand an upgraded socket to `server` and drive it until it closes.
///
/// The produced transport is kept alive for the whole connection.
pub async fn serve_websocket<S>(server: &S, socket: WebSocket, uri: impl Into<String>)
where
    S: TransportServer<AxumWebSocket>,
{
    let (ws, driver) = AxumWebSocket::new(socket, uri);
    let _transport = server.accept(ws);
    driver.run().await;
}
