//! Transport abstraction traits for Ripple.
//!
//! These traits define the seams every transport kind plugs into: the wire-facing
//! [`TransportBackend`] and the [`TransportServer`] factory that turns raw connections
//! into [`ServerTransport`]s.

use crate::transport::ServerTransport;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let seq = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self(format!("conn_{:x}_{}", timestamp, seq))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
///
/// Errors are delivered to `on_error` listeners by reference and forwarded between
/// listener lists, so they carry rendered messages rather than source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport is closing or closed.
    #[error("Connection closed")]
    Closed,

    /// Failed to write a frame.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to read a frame.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The wire-facing half of a transport.
///
/// A backend only moves frames. Listener bookkeeping, state and send/close
/// serialization live in [`ServerTransport`], which calls these methods while holding
/// its write lock; they must not call back into the transport.
pub trait TransportBackend: Send + Sync + 'static {
    /// Address of the underlying connection.
    fn uri(&self) -> &str;

    /// Write a text frame.
    fn send_text(&self, data: String);

    /// Write a binary frame.
    fn send_binary(&self, data: Bytes);

    /// Ask the underlying connection to terminate.
    fn close(&self);

    /// The protocol-specific object this backend wraps, for [`ServerTransport::unwrap`].
    fn as_any(&self) -> &dyn Any;
}

/// Consumes raw connections of type `R` and produces [`ServerTransport`]s.
///
/// Instances may be shared between threads; `accept` and `on_transport` may race.
pub trait TransportServer<R>: Send + Sync {
    /// Wrap `raw` in a transport and fire it to every registered listener, in
    /// registration order, before returning it.
    fn accept(&self, raw: R) -> Arc<ServerTransport>;

    /// Register a listener for transports produced from now on.
    ///
    /// Transports produced before registration are not replayed.
    fn on_transport<F>(&self, listener: F) -> &Self
    where
        F: Fn(&Arc<ServerTransport>) + Send + Sync + 'static,
        Self: Sized;
}
