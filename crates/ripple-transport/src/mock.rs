//! In-memory [`ServerWebSocket`] for unit tests.

use crate::traits::TransportError;
use crate::transport::TransportEvents;
use crate::websocket::ServerWebSocket;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

/// Socket whose "wire" is a byte buffer written one byte at a time, so unserialized
/// concurrent writers would visibly interleave. Frames are newline terminated.
pub(crate) struct MockWebSocket {
    uri: String,
    events: TransportEvents,
    wire: Mutex<Vec<u8>>,
    close_requests: AtomicUsize,
}

impl MockWebSocket {
    pub(crate) fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            events: TransportEvents::new(),
            wire: Mutex::new(Vec::new()),
            close_requests: AtomicUsize::new(0),
        }
    }

    pub(crate) fn emit_text(&self, data: &str) {
        self.events.fire_text(data.to_string());
    }

    pub(crate) fn emit_binary(&self, data: &'static [u8]) {
        self.events.fire_binary(Bytes::from_static(data));
    }

    pub(crate) fn emit_error(&self, error: TransportError) {
        self.events.fire_error(error);
    }

    pub(crate) fn emit_close(&self) {
        self.events.fire_close();
    }

    /// Frames written so far, in wire order.
    pub(crate) fn frames(&self) -> Vec<String> {
        let wire = self.wire.lock().unwrap();
        wire.split(|b| *b == b'\n')
            .filter(|f| !f.is_empty())
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }

    pub(crate) fn close_requests(&self) -> usize {
        self.close_requests.load(Ordering::SeqCst)
    }

    fn write_frame(&self, prefix: &[u8], payload: &[u8]) {
        for byte in prefix.iter().chain(payload).chain(b"\n") {
            self.wire.lock().unwrap().push(*byte);
            thread::yield_now();
        }
    }
}

impl ServerWebSocket for MockWebSocket {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn send_text(&self, data: String) {
        self.write_frame(b"T:", data.as_bytes());
    }

    fn send_binary(&self, data: Bytes) {
        self.write_frame(b"B:", &data);
    }

    fn close(&self) {
        self.close_requests.fetch_add(1, Ordering::SeqCst);
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
