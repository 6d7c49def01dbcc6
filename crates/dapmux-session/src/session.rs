//! Session state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use dapmux_adapters::Language;
use dapmux_dap::{DapClient, StackFrame, Variable};

use crate::breakpoints::BreakpointStore;
use crate::trace::TraceBuffer;

/// Lifecycle state of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Session exists; no adapter yet.
    Created,
    /// Adapter starting and initializing.
    Initializing,
    /// Initialize handshake done; breakpoints can be applied.
    Ready,
    /// Debuggee executing.
    Running,
    /// Debuggee stopped (breakpoint, step, exception, pause).
    Paused,
    /// Adapter gone or debuggee finished.
    Terminated,
    /// Unrecoverable failure; inspectable until explicitly terminated.
    Error,
}

impl SessionState {
    /// Whether the session has a live adapter to talk to.
    pub fn has_adapter(&self) -> bool {
        matches!(self, Self::Ready | Self::Running | Self::Paused)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Terminated => "terminated",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// The cached {top frame, locals} captured on the most recent `stopped`
/// event. Source of the return values for step and continue operations.
#[derive(Debug, Clone)]
pub struct StopContext {
    /// The topmost stack frame at the stop.
    pub frame: StackFrame,
    /// The locals of that frame, possibly truncated.
    pub variables: Vec<Variable>,
}

/// All mutable state of one debug session. Guarded by a per-session mutex
/// in the manager so operations and event handling serialize.
pub struct SessionData {
    /// Opaque id, unique for the process lifetime.
    pub id: String,
    /// Human name.
    pub name: String,
    /// Language tag.
    pub language: Language,
    /// Lifecycle state.
    pub state: SessionState,
    /// Script being debugged, once started.
    pub script_path: Option<PathBuf>,
    /// Debuggee working directory.
    pub cwd: Option<PathBuf>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Reason of the most recent stop.
    pub stopped_reason: Option<String>,
    /// Thread of the most recent stop.
    pub stopped_thread_id: Option<i64>,
    /// Debuggee exit code, from the `exited` event.
    pub exit_code: Option<i64>,
    /// Failure description when `state` is `Error`.
    pub error_message: Option<String>,
    /// The DAP client, once started.
    pub client: Option<Arc<DapClient>>,
    /// Desired breakpoint state; authoritative over adapter replies.
    pub breakpoints: BreakpointStore,
    /// Thread id used for stepping when the caller does not name one.
    pub current_thread_id: i64,
    /// Frame id refreshed on every stop, used for inspection defaults.
    pub current_frame_id: Option<i64>,
    /// Stop context cached by the stopped-event handler.
    pub last_stop: Option<StopContext>,
    /// Collected tracepoint hits.
    pub traces: TraceBuffer,
    /// Callers blocked in wait-for-pause.
    pub pause_waiters: Vec<oneshot::Sender<()>>,
}

impl SessionData {
    /// Fresh session in the `created` state.
    pub fn new(id: String, name: String, language: Language, trace_cap: usize) -> Self {
        Self {
            id,
            name,
            language,
            state: SessionState::Created,
            script_path: None,
            cwd: None,
            created_at: SystemTime::now(),
            stopped_reason: None,
            stopped_thread_id: None,
            exit_code: None,
            error_message: None,
            client: None,
            breakpoints: BreakpointStore::new(),
            current_thread_id: 1,
            current_frame_id: None,
            last_stop: None,
            traces: TraceBuffer::new(trace_cap),
            pause_waiters: Vec::new(),
        }
    }

    /// Wake everyone blocked in wait-for-pause. Called after the stop
    /// context is populated, so waiters always observe fresh state.
    pub fn notify_pause_waiters(&mut self) {
        for waiter in self.pause_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// Condensed view for listings.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            language: self.language,
            state: self.state,
        }
    }

    /// Full snapshot for `getSessionInfo`.
    pub fn details(&self) -> SessionDetails {
        SessionDetails {
            id: self.id.clone(),
            name: self.name.clone(),
            language: self.language,
            state: self.state,
            script_path: self
                .script_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            stopped_reason: self.stopped_reason.clone(),
            stopped_thread_id: self.stopped_thread_id,
            exit_code: self.exit_code,
            error_message: self.error_message.clone(),
            breakpoint_count: self.breakpoints.len(),
            trace_count: self.traces.len(),
        }
    }
}

/// Condensed session view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session id.
    pub id: String,
    /// Human name.
    pub name: String,
    /// Language tag.
    pub language: Language,
    /// Lifecycle state.
    pub state: SessionState,
}

/// Full session snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetails {
    /// Session id.
    pub id: String,
    /// Human name.
    pub name: String,
    /// Language tag.
    pub language: Language,
    /// Lifecycle state.
    pub state: SessionState,
    /// Script being debugged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,
    /// Reason of the most recent stop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_reason: Option<String>,
    /// Thread of the most recent stop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_thread_id: Option<i64>,
    /// Debuggee exit code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Number of breakpoints across all files.
    pub breakpoint_count: usize,
    /// Number of collected traces.
    pub trace_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionData {
        SessionData::new("s-1".into(), "py-1".into(), Language::Python, 100)
    }

    #[test]
    fn session_new_is_created() {
        let data = sample();
        assert_eq!(data.state, SessionState::Created);
        assert_eq!(data.current_thread_id, 1);
        assert!(data.client.is_none());
        assert!(data.last_stop.is_none());
    }

    #[test]
    fn session_state_has_adapter() {
        assert!(!SessionState::Created.has_adapter());
        assert!(!SessionState::Initializing.has_adapter());
        assert!(SessionState::Ready.has_adapter());
        assert!(SessionState::Running.has_adapter());
        assert!(SessionState::Paused.has_adapter());
        assert!(!SessionState::Terminated.has_adapter());
        assert!(!SessionState::Error.has_adapter());
    }

    #[test]
    fn session_state_display_lowercase() {
        assert_eq!(SessionState::Created.to_string(), "created");
        assert_eq!(SessionState::Paused.to_string(), "paused");
        assert_eq!(SessionState::Error.to_string(), "error");
    }

    #[test]
    fn session_state_serde() {
        assert_eq!(
            serde_json::to_string(&SessionState::Running).unwrap(),
            "\"running\""
        );
        let state: SessionState = serde_json::from_str("\"terminated\"").unwrap();
        assert_eq!(state, SessionState::Terminated);
    }

    #[tokio::test]
    async fn session_notify_pause_waiters_drains() {
        let mut data = sample();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        data.pause_waiters.push(tx1);
        data.pause_waiters.push(tx2);

        data.notify_pause_waiters();
        assert!(data.pause_waiters.is_empty());
        assert!(rx1.await.is_ok());
        assert!(rx2.await.is_ok());
    }

    #[test]
    fn session_summary_and_details() {
        let mut data = sample();
        data.stopped_reason = Some("breakpoint".into());

        let summary = data.summary();
        assert_eq!(summary.id, "s-1");
        assert_eq!(summary.language, Language::Python);

        let details = data.details();
        assert_eq!(details.stopped_reason.as_deref(), Some("breakpoint"));
        assert_eq!(details.breakpoint_count, 0);
        assert_eq!(details.trace_count, 0);
    }
}
