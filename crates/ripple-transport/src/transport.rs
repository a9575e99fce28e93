//! The uniform server-side transport handle.
//!
//! A [`ServerTransport`] pairs one protocol-specific [`TransportBackend`] with the
//! shared [`TransportEvents`] that backend's native events are forwarded into. Session
//! logic only ever sees `ServerTransport`, whichever protocol carried the data.

use crate::actions::{Actions, ActionsOptions};
use crate::traits::{ConnectionId, TransportBackend, TransportError};
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// The four event points of a connection: close, error, text and binary.
///
/// Shared between a [`ServerTransport`] and whatever feeds it events (usually closures
/// registered on the raw connection), so the feeder never holds the transport itself.
/// Raw sockets use the same type for their native events.
///
/// Feeders should deliver events from a single task. If close races a message fired
/// from another thread, listeners that have not started yet are skipped.
#[derive(Debug)]
pub struct TransportEvents {
    close: Actions<()>,
    error: Actions<TransportError>,
    text: Actions<String>,
    binary: Actions<Bytes>,
    closed: Arc<AtomicBool>,
}

impl TransportEvents {
    /// Create an empty set of listener lists.
    #[must_use]
    pub fn new() -> Self {
        Self {
            close: Actions::with_options(ActionsOptions::once_with_memory()),
            error: Actions::new(),
            text: Actions::new(),
            binary: Actions::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a close listener. Runs immediately if already closed.
    pub fn on_close<F>(&self, listener: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.close.add(move |_| listener());
        self
    }

    /// Register an error listener.
    pub fn on_error<F>(&self, listener: F) -> &Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        let closed = self.closed.clone();
        self.error.add(move |error| {
            if !closed.load(Ordering::SeqCst) {
                listener(error);
            }
        });
        self
    }

    /// Register a text message listener.
    pub fn on_text<F>(&self, listener: F) -> &Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let closed = self.closed.clone();
        self.text.add(move |data: &String| {
            if !closed.load(Ordering::SeqCst) {
                listener(data.as_str());
            }
        });
        self
    }

    /// Register a binary message listener.
    pub fn on_binary<F>(&self, listener: F) -> &Self
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        let closed = self.closed.clone();
        self.binary.add(move |data| {
            if !closed.load(Ordering::SeqCst) {
                listener(data);
            }
        });
        self
    }

    /// Deliver a text message. Ignored once closed.
    pub fn fire_text(&self, data: String) {
        if !self.is_closed() {
            self.text.fire(data);
        }
    }

    /// Deliver a binary message. Ignored once closed.
    pub fn fire_binary(&self, data: Bytes) {
        if !self.is_closed() {
            self.binary.fire(data);
        }
    }

    /// Deliver an error. Ignored once closed.
    pub fn fire_error(&self, error: TransportError) {
        if !self.is_closed() {
            self.error.fire(error);
        }
    }

    /// Mark the transport closed and fire close listeners.
    ///
    /// Only the first call has any effect. Message and error listeners are dropped
    /// afterwards since they can never fire again.
    pub fn fire_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close.fire(());
        self.error.disable();
        self.text.disable();
        self.binary.disable();
    }

    /// Whether the close event has fired.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for TransportEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// A live, bidirectional, message-oriented connection to one peer.
///
/// All methods take `&self` and may be called from any thread. Sends and close are
/// serialized by an internal lock, so frames from concurrent callers never interleave
/// and nothing is written after `close()` returns.
///
/// After `close()` is requested, `send_text`/`send_binary` return
/// [`TransportError::Closed`] without touching the wire; repeated `close()` calls are
/// no-ops.
pub struct ServerTransport {
    id: ConnectionId,
    uri: String,
    events: Arc<TransportEvents>,
    backend: Box<dyn TransportBackend>,
    closing: AtomicBool,
    write_lock: Mutex<()>,
}

impl ServerTransport {
    /// Build a transport over `backend`.
    ///
    /// `events` must already be wired to the backend's native events.
    #[must_use]
    pub fn new<B: TransportBackend>(backend: B, events: Arc<TransportEvents>) -> Arc<Self> {
        let uri = backend.uri().to_string();
        Arc::new(Self {
            id: ConnectionId::generate(),
            uri,
            events,
            backend: Box::new(backend),
            closing: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        })
    }

    /// Get the transport's unique identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Address of the underlying connection.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Whether the transport still accepts sends.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closing.load(Ordering::SeqCst) && !self.events.is_closed()
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the transport is closing or closed.
    pub fn send_text(&self, data: impl Into<String>) -> Result<(), TransportError> {
        let _guard = self.write_guard();
        self.ensure_open()?;
        self.backend.send_text(data.into());
        Ok(())
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the transport is closing or closed.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        let _guard = self.write_guard();
        self.ensure_open()?;
        self.backend.send_binary(data.into());
        Ok(())
    }

    /// Request termination of the underlying connection.
    ///
    /// Completion is signalled by the close event, not by this call returning.
    pub fn close(&self) {
        let _guard = self.write_guard();
        if self.closing.swap(true, Ordering::SeqCst) || self.events.is_closed() {
            trace!(transport = %self.id, "Close already requested");
            return;
        }
        debug!(transport = %self.id, uri = %self.uri, "Closing transport");
        self.backend.close();
    }

    /// Register a close listener.
    ///
    /// Close fires exactly once. A listener added after the transport closed runs
    /// immediately.
    pub fn on_close<F>(&self, listener: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.on_close(listener);
        self
    }

    /// Register an error listener.
    pub fn on_error<F>(&self, listener: F) -> &Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.events.on_error(listener);
        self
    }

    /// Register a text message listener.
    pub fn on_text<F>(&self, listener: F) -> &Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events.on_text(listener);
        self
    }

    /// Register a binary message listener.
    pub fn on_binary<F>(&self, listener: F) -> &Self
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.events.on_binary(listener);
        self
    }

    /// Access the protocol-specific object behind this transport.
    ///
    /// Returns `None` unless `T` is exactly the type the backend wraps.
    #[must_use]
    pub fn unwrap<T: Any>(&self) -> Option<&T> {
        self.backend.as_any().downcast_ref::<T>()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_open() {
            Ok(())
        } else {
            debug!(transport = %self.id, "Dropping send on closed transport");
            Err(TransportError::Closed)
        }
    }

    // The guarded section only calls into the backend, which does not panic across
    // this boundary; recover the guard if it ever does.
    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ServerTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTransport")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("open", &self.is_open())
            .finish()
    }
}

impl fmt::Display for ServerTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.uri)
    }
}
