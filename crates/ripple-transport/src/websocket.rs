//! WebSocket transport implementation.
//!
//! WebSocket already is a message-oriented, bidirectional protocol, so a WebSocket
//! transport is the raw socket made thread-safe and given the uniform listener
//! contract. Sockets are produced elsewhere (see [`crate::upgrade`] for the axum one)
//! and handed to [`WebSocketTransportServer::accept`].

use crate::actions::Actions;
use crate::traits::{TransportBackend, TransportError, TransportServer};
use crate::transport::{ServerTransport, TransportEvents};
use bytes::Bytes;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// An established server-side WebSocket, as provided by the HTTP layer.
///
/// Implementations deliver each native event at most once per occurrence. The
/// send/close primitives must not block and must not deliver events synchronously,
/// since they are called under the transport's write lock.
pub trait ServerWebSocket: Send + Sync + 'static {
    /// Request URI the socket was opened on.
    fn uri(&self) -> &str;

    /// Queue a text frame.
    fn send_text(&self, data: String);

    /// Queue a binary frame.
    fn send_binary(&self, data: Bytes);

    /// Start the closing handshake.
    fn close(&self);

    /// Register a listener for socket errors.
    fn on_error<F>(&self, listener: F) -> &Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static;

    /// Register a listener for the socket closing.
    fn on_close<F>(&self, listener: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static;

    /// Register a listener for text frames.
    fn on_text<F>(&self, listener: F) -> &Self
    where
        F: Fn(&str) + Send + Sync + 'static;

    /// Register a listener for binary frames.
    fn on_binary<F>(&self, listener: F) -> &Self
    where
        F: Fn(&Bytes) + Send + Sync + 'static;
}

/// [`TransportBackend`] over a [`ServerWebSocket`].
pub struct WebSocketBackend<W> {
    ws: W,
}

impl<W: ServerWebSocket> WebSocketBackend<W> {
    /// Wrap `ws` in a transport.
    ///
    /// The socket's native events are wired to the transport's listener lists before
    /// the transport is returned, so no event can be missed.
    #[must_use]
    pub fn into_transport(ws: W) -> Arc<ServerTransport> {
        let events = Arc::new(TransportEvents::new());

        let (on_error, on_close) = (events.clone(), events.clone());
        let (on_text, on_binary) = (events.clone(), events.clone());
        ws.on_error(move |error| on_error.fire_error(error.clone()))
            .on_close(move || on_close.fire_close())
            .on_text(move |data| on_text.fire_text(data.to_string()))
            .on_binary(move |data| on_binary.fire_binary(data.clone()));

        ServerTransport::new(Self { ws }, events)
    }
}

impl<W: ServerWebSocket> TransportBackend for WebSocketBackend<W> {
    fn uri(&self) -> &str {
        self.ws.uri()
    }

    fn send_text(&self, data: String) {
        self.ws.send_text(data);
    }

    fn send_binary(&self, data: Bytes) {
        self.ws.send_binary(data);
    }

    fn close(&self) {
        self.ws.close();
    }

    /// Only `W` itself is available.
    fn as_any(&self) -> &dyn Any {
        &self.ws
    }
}

/// [`TransportServer`] for WebSocket connections such as `ws://localhost:8080/ws`.
///
/// A built-in listener that traces transports opening and closing is always registered
/// first; user listeners follow in registration order.
pub struct WebSocketTransportServer<W> {
    transport_actions: Actions<Arc<ServerTransport>>,
    _socket: PhantomData<fn(W)>,
}

impl<W: ServerWebSocket> WebSocketTransportServer<W> {
    /// Create a server with only the built-in listener registered.
    #[must_use]
    pub fn new() -> Self {
        let transport_actions = Actions::new();
        transport_actions.add(|transport: &Arc<ServerTransport>| {
            trace!(transport = %transport.id(), uri = %transport.uri(), "Transport opened");
            let id = transport.id().clone();
            transport.on_close(move || trace!(transport = %id, "Transport closed"));
        });

        Self {
            transport_actions,
            _socket: PhantomData,
        }
    }

    /// Number of registered listeners, the built-in one included.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.transport_actions.len()
    }
}

impl<W: ServerWebSocket> Default for WebSocketTransportServer<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: ServerWebSocket> TransportServer<W> for WebSocketTransportServer<W> {
    fn accept(&self, ws: W) -> Arc<ServerTransport> {
        let transport = WebSocketBackend::into_transport(ws);
        self.transport_actions.fire(transport.clone());
        transport
    }

    fn on_transport<F>(&self, listener: F) -> &Self
    where
        F: Fn(&Arc<ServerTransport>) + Send + Sync + 'static,
    {
        self.transport_actions.add(listener);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockWebSocket;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;

    fn server() -> WebSocketTransportServer<MockWebSocket> {
        WebSocketTransportServer::new()
    }

    fn mock(transport: &ServerTransport) -> &MockWebSocket {
        transport
            .unwrap::<MockWebSocket>()
            .expect("transport wraps a MockWebSocket")
    }

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let server = server();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = order.clone();
            server.on_transport(move |_| order.lock().unwrap().push(name));
        }
        assert_eq!(server.listener_count(), 4);

        server.accept(MockWebSocket::new("/ws"));

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_late_listener_sees_only_new_transports() {
        let server = server();
        server.accept(MockWebSocket::new("/ws?n=1"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        server.on_transport(move |t| s.lock().unwrap().push(t.uri().to_string()));
        server.accept(MockWebSocket::new("/ws?n=2"));

        assert_eq!(*seen.lock().unwrap(), vec!["/ws?n=2"]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let server = server();
        let count = Arc::new(AtomicUsize::new(0));
        server.on_transport(|_| panic!("listener bug"));
        let c = count.clone();
        server.on_transport(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        server.accept(MockWebSocket::new("/ws"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_uri_delegates_to_socket() {
        let transport = server().accept(MockWebSocket::new("/chat?room=1"));
        assert_eq!(transport.uri(), "/chat?room=1");
    }

    #[test]
    fn test_native_events_are_forwarded() {
        let transport = server().accept(MockWebSocket::new("/ws"));
        let log = Arc::new(Mutex::new(Vec::new()));

        let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());
        transport
            .on_text(move |t| l1.lock().unwrap().push(format!("text:{}", t)))
            .on_binary(move |b| l2.lock().unwrap().push(format!("binary:{:?}", &b[..])))
            .on_error(move |e| l3.lock().unwrap().push(format!("error:{}", e)));

        let ws = mock(&transport);
        ws.emit_text("ping");
        ws.emit_binary(&[1, 2]);
        ws.emit_error(TransportError::ReceiveFailed("reset".into()));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["text:ping", "binary:[1, 2]", "error:Receive failed: reset"]
        );
        // An error alone leaves the transport usable.
        assert!(transport.is_open());
    }

    #[test]
    fn test_concurrent_sends_never_interleave() {
        let transport = server().accept(MockWebSocket::new("/ws"));
        let threads = 8;
        let per_thread = 20;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let transport = transport.clone();
                thread::spawn(move || {
                    for i in 0..per_thread {
                        transport
                            .send_text(format!("thread-{}-message-{}", t, i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let frames = mock(&transport).frames();
        assert_eq!(frames.len(), threads * per_thread);
        for t in 0..threads {
            for i in 0..per_thread {
                let expected = format!("T:thread-{}-message-{}", t, i);
                assert_eq!(frames.iter().filter(|f| **f == expected).count(), 1);
            }
        }
    }

    #[test]
    fn test_double_close_fires_once() {
        let transport = server().accept(MockWebSocket::new("/ws"));
        let closes = Arc::new(AtomicUsize::new(0));
        let c = closes.clone();
        transport.on_close(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        transport.close();
        transport.close();
        assert_eq!(mock(&transport).close_requests(), 1);

        // The socket finishes its closing handshake.
        mock(&transport).emit_close();
        mock(&transport).emit_close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unwrap_only_exposes_socket_type() {
        let transport = server().accept(MockWebSocket::new("/ws"));
        let first = transport.unwrap::<MockWebSocket>().map(|ws| ws as *const _);
        let second = transport.unwrap::<MockWebSocket>().map(|ws| ws as *const _);
        assert!(first.is_some());
        assert_eq!(first, second);

        assert!(transport.unwrap::<String>().is_none());
        assert!(transport.unwrap::<WebSocketBackend<MockWebSocket>>().is_none());
    }

    #[test]
    fn test_ping_then_close_scenario() {
        let server = server();
        let received = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));

        let (r, c) = (received.clone(), closes.clone());
        server.on_transport(move |transport| {
            let r = r.clone();
            let c = c.clone();
            transport
                .on_text(move |data| r.lock().unwrap().push(data.to_string()))
                .on_close(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                });
        });

        let t1 = server.accept(MockWebSocket::new("/ws"));
        let ws = mock(&t1);

        ws.emit_text("ping");
        assert_eq!(*received.lock().unwrap(), vec!["ping"]);

        ws.emit_close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        assert_eq!(t1.send_text("x"), Err(TransportError::Closed));
        assert!(ws.frames().is_empty());

        // Nothing fires after close.
        ws.emit_text("late");
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}
