//! Pool lifecycle events as published by the pool under test, and the
//! subscriber that captures them during a run.

use std::pin::pin;
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

use crate::options::PoolOptions;

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionClosedReason {
    /// The pool was cleared after the connection was created.
    Stale,
    /// The connection sat idle longer than `max_idle_time`.
    Idle,
    /// The connection hit an error.
    Error,
    /// The pool itself was closed.
    PoolClosed,
}

impl ConnectionClosedReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionClosedReason::Stale => "stale",
            ConnectionClosedReason::Idle => "idle",
            ConnectionClosedReason::Error => "error",
            ConnectionClosedReason::PoolClosed => "poolClosed",
        }
    }
}

/// Why a checkout attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutFailedReason {
    PoolClosed,
    Timeout,
    ConnectionError,
}

impl CheckOutFailedReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CheckOutFailedReason::PoolClosed => "poolClosed",
            CheckOutFailedReason::Timeout => "timeout",
            CheckOutFailedReason::ConnectionError => "connectionError",
        }
    }
}

/// Internal lifecycle event, carrying whatever the pool knows at publish time.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    PoolCreated {
        address: String,
        options: PoolOptions,
    },
    PoolReady {
        address: String,
    },
    PoolCleared {
        address: String,
    },
    PoolClosed {
        address: String,
    },
    ConnectionCreated {
        address: String,
        connection_id: u64,
    },
    ConnectionReady {
        address: String,
        connection_id: u64,
    },
    ConnectionClosed {
        address: String,
        connection_id: u64,
        reason: ConnectionClosedReason,
    },
    CheckOutStarted {
        address: String,
    },
    CheckOutFailed {
        address: String,
        reason: CheckOutFailedReason,
    },
    CheckedOut {
        address: String,
        connection_id: u64,
    },
    CheckedIn {
        address: String,
        connection_id: u64,
    },
}

/// Receiver of pool lifecycle events.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: PoolEvent);
}

/// Subscriber that keeps every event in publish order.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<PoolEvent>>,
    published: Notify,
}

impl EventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything captured so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PoolEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of captured events whose canonical type is `event_type`.
    #[must_use]
    pub fn count_of(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.canonical_type() == Some(event_type))
            .count()
    }

    /// Wait until at least `count` events of the canonical `event_type` have been captured.
    pub async fn wait_for(&self, event_type: &str, count: usize) {
        loop {
            let mut notified = pin!(self.published.notified());
            notified.as_mut().enable();
            if self.count_of(event_type) >= count {
                return;
            }
            notified.await;
        }
    }
}

impl EventSink for EventRecorder {
    fn publish(&self, event: PoolEvent) {
        tracing::trace!(?event, "pool event");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        self.published.notify_waiters();
    }
}
