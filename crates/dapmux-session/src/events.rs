//! Session event fan-out.
//!
//! Publish/subscribe over unbounded channels: every live subscriber sees
//! every event in publication order; dead subscribers are pruned on
//! publish.

use tokio::sync::{mpsc, Mutex};

use crate::session::SessionState;

/// Events published by the session manager.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A session moved to a new lifecycle state.
    StateChanged {
        /// The session.
        session_id: String,
        /// The new state.
        state: SessionState,
        /// The previous state.
        previous: SessionState,
    },
    /// A session stopped and the stop is surfaced to clients (tracepoint
    /// auto-continues are not).
    Stopped {
        /// The session.
        session_id: String,
        /// Stop reason from the adapter.
        reason: String,
        /// Stopped thread.
        thread_id: i64,
        /// Optional human description.
        description: Option<String>,
    },
    /// Debuggee or adapter output.
    Output {
        /// The session.
        session_id: String,
        /// Output category ("stdout", "stderr", "console").
        category: String,
        /// The text.
        output: String,
    },
    /// A session ended.
    Terminated {
        /// The session.
        session_id: String,
        /// Debuggee exit code, when known.
        exit_code: Option<i64>,
    },
    /// An error surfaced outside a request/response exchange.
    Error {
        /// The session.
        session_id: String,
        /// Description.
        message: String,
    },
}

/// Fan-out bus for [`SessionEvent`].
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl EventBus {
    /// Empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber receiving all future events.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    pub async fn publish(&self, event: SessionEvent) {
        self.subscribers
            .lock()
            .await
            .retain(|sub| sub.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}
