//! # ripple-transport
//!
//! Transport abstraction layer for the Ripple realtime engine.
//!
//! A raw, protocol-specific connection is turned into a [`ServerTransport`]: a uniform,
//! thread-safe handle with close/error/text/binary events and send/close operations.
//! Session logic built on top never learns which protocol carried the data.
//!
//! - **Actions** - Ordered multicast listener lists
//! - **ServerTransport** - The uniform transport handle
//! - **WebSocketTransportServer** - Turns WebSockets into transports and announces them
//! - **AxumWebSocket** - WebSocket backed by axum's upgrade (feature `axum`)
//!
//! ## Data flow
//!
//! ```text
//! ┌──────────────┐  accept  ┌─────────────────┐  fire  ┌───────────────────┐
//! │ raw socket   │────────▶│ TransportServer │───────▶│ on_transport      │
//! └──────────────┘          └─────────────────┘        │ listeners (order) │
//!                                                      └─────────┬─────────┘
//!                                                                ▼
//!                                                       ServerTransport events
//! ```
//!
//! ```rust,ignore
//! use ripple_transport::{TransportServer, WebSocketTransportServer};
//!
//! let server = WebSocketTransportServer::<AxumWebSocket>::new();
//! server.on_transport(|transport| {
//!     let echo = transport.clone();
//!     transport.on_text(move |text| {
//!         let _ = echo.send_text(text);
//!     });
//! });
//! ```

pub mod actions;
pub mod traits;
pub mod transport;
pub mod websocket;

#[cfg(feature = "axum")]
pub mod upgrade;

#[cfg(test)]
mod mock;

pub use actions::{Action, Actions, ActionsOptions};
pub use traits::{ConnectionId, TransportBackend, TransportError, TransportServer};
pub use transport::{ServerTransport, TransportEvents};
pub use websocket::{ServerWebSocket, WebSocketBackend, WebSocketTransportServer};

#[cfg(feature = "axum")]
pub use upgrade::{serve_websocket, AxumWebSocket, WebSocketDriver, DEFAULT_CLOSE_TIMEOUT};
