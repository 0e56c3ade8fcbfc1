//! Transport layer abstraction for the duplex connection.

use crate::error::{ClientError, ClientResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// A message-oriented duplex connection to the publisher.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (WebSocket adapters, an in-memory transport for tests).
/// The transport delivers inbound traffic through the [`TransportEvents`]
/// handler it was connected with.
pub trait StreamTransport: Send + Sync {
    /// Sends one outbound text frame.
    fn send(&self, frame: &str) -> ClientResult<()>;

    /// Returns true if the connection is open.
    fn is_open(&self) -> bool;

    /// Closes the connection.
    fn close(&self);
}

/// Callbacks a transport invokes for connection lifecycle and inbound traffic.
pub trait TransportEvents: Send + Sync {
    /// The connection became open.
    fn on_open(&self);

    /// One inbound text frame arrived.
    fn on_message(&self, frame: &str);

    /// The connection closed or failed.
    fn on_close(&self);
}

/// Creates transports on demand.
///
/// The engine calls `connect` once up front and again on every reconnect;
/// each call must produce a fresh connection wired to the given handler.
pub trait TransportFactory: Send + Sync {
    /// Opens a new connection to `address`.
    fn connect(
        &self,
        address: &str,
        events: Arc<dyn TransportEvents>,
    ) -> ClientResult<Arc<dyn StreamTransport>>;
}

impl<F: TransportFactory + ?Sized> TransportFactory for Arc<F> {
    fn connect(
        &self,
        address: &str,
        events: Arc<dyn TransportEvents>,
    ) -> ClientResult<Arc<dyn StreamTransport>> {
        (**self).connect(address, events)
    }
}

/// An in-memory transport for testing.
///
/// Connections start closed; tests drive the lifecycle explicitly with
/// [`open`](MockTransport::open), [`deliver`](MockTransport::deliver) and
/// [`drop_connection`](MockTransport::drop_connection), and inspect outbound
/// traffic with [`sent_frames`](MockTransport::sent_frames).
pub struct MockTransport {
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
    events: Arc<dyn TransportEvents>,
}

impl MockTransport {
    fn new(events: Arc<dyn TransportEvents>) -> Self {
        Self {
            open: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Simulates the connection becoming open.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.events.on_open();
    }

    /// Delivers one inbound frame to the engine.
    pub fn deliver(&self, frame: &str) {
        self.events.on_message(frame);
    }

    /// Simulates the connection dropping.
    pub fn drop_connection(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.events.on_close();
    }

    /// Returns every frame sent so far.
    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Clears the record of sent frames.
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }
}

impl StreamTransport for MockTransport {
    fn send(&self, frame: &str) -> ClientResult<()> {
        if !self.is_open() {
            return Err(ClientError::NotOpen);
        }
        self.sent.lock().push(frame.to_string());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// A factory producing [`MockTransport`]s and keeping every connection it
/// made, so tests can reach transports created by the reconnect path.
#[derive(Default)]
pub struct MockFactory {
    connections: Mutex<Vec<Arc<MockTransport>>>,
    connect_attempts: AtomicU32,
    fail_remaining: AtomicU32,
}

impl MockFactory {
    /// Creates a new factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `connect` fail.
    pub fn fail_connects(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Returns how many times `connect` was called, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Returns the number of connections made so far.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Returns the nth connection.
    pub fn connection(&self, index: usize) -> Option<Arc<MockTransport>> {
        self.connections.lock().get(index).cloned()
    }

    /// Returns the most recent connection.
    pub fn last_connection(&self) -> Option<Arc<MockTransport>> {
        self.connections.lock().last().cloned()
    }
}

impl TransportFactory for MockFactory {
    fn connect(
        &self,
        _address: &str,
        events: Arc<dyn TransportEvents>,
    ) -> ClientResult<Arc<dyn StreamTransport>> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClientError::Transport("mock connect failure".into()));
        }
        let transport = Arc::new(MockTransport::new(events));
        self.connections.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}
