//! Configuration for the stream engine.

use std::sync::Arc;
use std::time::Duration;
use wirestream_protocol::RoomKey;

/// Why a message was silently discarded.
///
/// The engine never surfaces drops to the application; this reason is only
/// handed to the optional diagnostic hook on [`StreamConfig`].
#[derive(Debug, Clone)]
pub enum DropReason {
    /// The frame or its payload failed to decode.
    Decode {
        /// Decoder error text.
        detail: String,
    },
    /// A staleness comparator rejected the event.
    Stale {
        /// Room the event was addressed to.
        room: RoomKey,
        /// Wire name of the event type.
        event: &'static str,
        /// Timestamp carried by the rejected event.
        timestamp: u64,
    },
}

/// Diagnostic callback invoked for every discarded message.
pub type DropHook = Arc<dyn Fn(&DropReason) + Send + Sync>;

/// Configuration for a [`Stream`](crate::Stream).
#[derive(Clone)]
pub struct StreamConfig {
    /// Address handed to the transport factory.
    pub address: String,
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
    /// Optional observer for silently dropped messages.
    pub on_drop: Option<DropHook>,
}

impl StreamConfig {
    /// Creates a configuration for the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reconnect: ReconnectConfig::default(),
            on_drop: None,
        }
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Installs a diagnostic hook for dropped messages.
    pub fn with_drop_hook(mut self, hook: impl Fn(&DropReason) + Send + Sync + 'static) -> Self {
        self.on_drop = Some(Arc::new(hook));
        self
    }
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("address", &self.address)
            .field("reconnect", &self.reconnect)
            .field("on_drop", &self.on_drop.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Configuration for reconnect behavior.
///
/// The default preserves the engine's long-standing contract: a fixed two
/// second delay, no backoff growth, and no attempt ceiling.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Multiplier applied per subsequent attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Maximum number of attempts, or `None` for unbounded.
    pub max_attempts: Option<u32>,
}

impl ReconnectConfig {
    /// Creates the default fixed-delay policy.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            backoff_multiplier: 1.0,
            max_delay: delay,
            max_attempts: None,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        if self.max_delay < delay {
            self.max_delay = delay;
        }
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(2))
    }
}
