//! The session manager: owner of every live debug session.
//!
//! Single external entry point for session operations. Each session's
//! mutable state sits behind its own async mutex, so public operations and
//! the event pump serialize per session; handlers reach sessions through
//! the id-keyed table rather than back-pointers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Duration;

use dapmux_adapters::{adapter_for, AdapterOverride, Language, LaunchParams};
use dapmux_config::DapmuxConfig;
use dapmux_dap::{
    ClientEvent, ClientTimeouts, DapClient, Event, ExitedEventBody, OutputEventBody,
    StoppedEventBody,
};

use crate::breakpoints::{normalize_path, SessionBreakpoint};
use crate::error::SessionError;
use crate::events::{EventBus, SessionEvent};
use crate::results::{BreakpointResult, OpResult, StartResult, TracesPage};
use crate::session::{SessionData, SessionDetails, SessionState, SessionSummary, StopContext};
use crate::trace::{append_jsonl, TraceFilter, TracePoint};

/// How long terminated sessions stay visible before removal.
const TERMINATED_GRACE: Duration = Duration::from_secs(5);

pub(crate) type SessionRef = Arc<Mutex<SessionData>>;

pub(crate) struct ManagerInner {
    pub(crate) sessions: RwLock<HashMap<String, SessionRef>>,
    pub(crate) bus: EventBus,
    pub(crate) config: DapmuxConfig,
    next_id: AtomicU64,
}

/// The multi-session debug orchestrator.
#[derive(Clone)]
pub struct SessionManager {
    pub(crate) inner: Arc<ManagerInner>,
}

/// Caller-facing breakpoint request.
#[derive(Debug, Clone, Default)]
pub struct BreakpointSpec {
    /// Source file; relative paths resolve against the session cwd.
    pub file: PathBuf,
    /// 1-based line.
    pub line: i64,
    /// Optional column.
    pub column: Option<i64>,
    /// Condition expression.
    pub condition: Option<String>,
    /// Hit condition expression.
    pub hit_condition: Option<String>,
    /// Log message (logpoint).
    pub log_message: Option<String>,
    /// Tracepoint flag.
    pub trace: bool,
    /// JSONL dump file.
    pub dump_file: Option<PathBuf>,
    /// Auto-continue budget.
    pub max_dumps: Option<u32>,
}

impl SessionManager {
    /// Manager with the given configuration.
    pub fn new(config: DapmuxConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                sessions: RwLock::new(HashMap::new()),
                bus: EventBus::new(),
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to session events.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.inner.bus.subscribe().await
    }

    /// The effective configuration.
    pub fn config(&self) -> &DapmuxConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Create a session in the `created` state.
    pub async fn create_session(
        &self,
        language: Language,
        name: Option<String>,
        executable_path: Option<PathBuf>,
    ) -> SessionSummary {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("sess-{n}");
        let name = name.unwrap_or_else(|| format!("{language}-{n}"));

        let mut data = SessionData::new(
            id.clone(),
            name,
            language,
            self.inner.config.traces.buffer_cap,
        );
        data.script_path = executable_path;
        let summary = data.summary();

        self.inner
            .sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(data)));
        tracing::info!(session = %summary.id, language = %language, "created session");
        summary
    }

    /// All sessions, including terminated ones still in their grace window.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.inner.sessions.read().await;
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions.values() {
            out.push(session.lock().await.summary());
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Full snapshot of one session.
    pub async fn session_info(&self, session_id: &str) -> Result<SessionDetails, SessionError> {
        let session = self.get(session_id).await?;
        let data = session.lock().await;
        Ok(data.details())
    }

    pub(crate) async fn get(&self, session_id: &str) -> Result<SessionRef, SessionError> {
        self.inner
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    pub(crate) async fn transition(&self, data: &mut SessionData, state: SessionState) {
        if data.state == state {
            return;
        }
        let previous = data.state;
        data.state = state;
        tracing::debug!(session = %data.id, %previous, %state, "state changed");
        self.inner
            .bus
            .publish(SessionEvent::StateChanged {
                session_id: data.id.clone(),
                state,
                previous,
            })
            .await;
    }

    // -----------------------------------------------------------------
    // Start-debugging protocol
    // -----------------------------------------------------------------

    /// Start the adapter and launch the debuggee.
    ///
    /// Order matters and covers both adapter behaviors: those that send
    /// `initialized` before answering `launch`, and those that hold the
    /// `launch` response until after `configurationDone`.
    pub async fn start_debugging(
        &self,
        session_id: &str,
        params: LaunchParams,
    ) -> Result<StartResult, SessionError> {
        let session = self.get(session_id).await?;
        let mut data = session.lock().await;

        if data.state != SessionState::Created {
            return Ok(StartResult {
                success: false,
                state: data.state,
                message: Some(format!(
                    "session is {}, expected created",
                    data.state
                )),
            });
        }
        self.transition(&mut data, SessionState::Initializing).await;

        match self.launch_locked(&mut data, params).await {
            Ok(()) => Ok(StartResult {
                success: true,
                state: data.state,
                message: None,
            }),
            Err(e) => {
                let message = e.to_string();
                tracing::error!(session = %session_id, "start failed: {message}");
                data.error_message = Some(message.clone());
                self.transition(&mut data, SessionState::Error).await;
                Ok(StartResult {
                    success: false,
                    state: SessionState::Error,
                    message: Some(message),
                })
            }
        }
    }

    async fn launch_locked(
        &self,
        data: &mut SessionData,
        params: LaunchParams,
    ) -> Result<(), SessionError> {
        let adapter = adapter_for(data.language);

        let install = adapter.check_installation();
        if !install.installed {
            return Err(dapmux_adapters::AdapterError::NotInstalled {
                adapter: adapter.name().into(),
                hint: install.error.unwrap_or_else(|| "unknown".into()),
            }
            .into());
        }

        let preferred = if params.script_path.as_os_str().is_empty() {
            data.script_path.clone()
        } else {
            Some(params.script_path.clone())
        };
        let executable = adapter.resolve_executable(preferred.as_deref())?;
        data.script_path = Some(executable.clone());
        data.cwd = params.cwd.clone();

        let overrides = self
            .inner
            .config
            .adapters
            .get(data.language.as_str())
            .map(|a| AdapterOverride {
                command: a.command.clone(),
                args: a.args.clone(),
            })
            .unwrap_or_default();
        let command = adapter.adapter_command(&overrides);

        let timeouts = &self.inner.config.timeouts;
        let client = DapClient::start_with_timeouts(
            &command,
            ClientTimeouts {
                request: Duration::from_millis(timeouts.request_ms),
                disconnect: Duration::from_millis(timeouts.disconnect_ms),
                child_handshake: Duration::from_millis(timeouts.child_handshake_ms),
                port_scrape: Duration::from_millis(timeouts.port_scrape_ms),
            },
        )
        .await?;
        data.client = Some(client.clone());

        // Event plumbing goes in before launch so nothing is missed; the
        // pump serializes behind this session's lock. One stream carries
        // adapter events and the connection-close / process-exit edges.
        let events = client.subscribe_events().await;
        self.clone().spawn_event_pump(data.id.clone(), events);

        client.initialize(adapter.name()).await?;

        let launch_config = adapter.build_launch_config(&params, &executable);
        let initialized = client.register_event_waiter("initialized").await;
        client
            .launch_async(serde_json::Value::Object(launch_config))
            .await?;

        let initialized_wait =
            Duration::from_millis(self.inner.config.timeouts.initialized_event_ms);
        match tokio::time::timeout(initialized_wait, initialized).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => {
                return Err(dapmux_dap::DapError::ConnectionClosed(
                    "adapter closed before the initialized event".into(),
                )
                .into())
            }
            Err(_) => {
                return Err(dapmux_dap::DapError::Timeout {
                    command: "event 'initialized'".into(),
                    timeout_ms: initialized_wait.as_millis() as u64,
                }
                .into())
            }
        }

        self.transition(data, SessionState::Ready).await;

        // Replay breakpoints queued before the adapter existed.
        for file in data.breakpoints.files() {
            let wire = data.breakpoints.source_breakpoints(&file);
            match client.set_breakpoints(&file, wire).await {
                Ok(acks) => data.breakpoints.apply_ack(&file, &acks),
                Err(e) => {
                    tracing::warn!(
                        session = %data.id,
                        file = %file.display(),
                        "breakpoint replay failed: {e}"
                    );
                }
            }
        }

        client.configuration_done().await?;

        let launch_wait = Duration::from_millis(self.inner.config.timeouts.launch_wait_ms);
        client.wait_for_launch(launch_wait).await?;

        self.transition(data, SessionState::Running).await;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Termination
    // -----------------------------------------------------------------

    /// Tear down a session: polite `disconnect`, unconditional kill,
    /// immediate removal from the table.
    pub async fn terminate_session(&self, session_id: &str) -> Result<OpResult, SessionError> {
        let session = self.get(session_id).await?;

        let client = {
            let mut data = session.lock().await;
            let client = data.client.take();
            if data.state != SessionState::Terminated {
                self.transition(&mut data, SessionState::Terminated).await;
                self.inner
                    .bus
                    .publish(SessionEvent::Terminated {
                        session_id: data.id.clone(),
                        exit_code: data.exit_code,
                    })
                    .await;
            }
            data.notify_pause_waiters();
            client
        };

        if let Some(client) = client {
            if let Err(e) = client.disconnect(true).await {
                tracing::debug!(session = %session_id, "disconnect during teardown: {e}");
            }
            client.kill().await;
        }

        self.inner.sessions.write().await.remove(session_id);
        tracing::info!(session = %session_id, "terminated session");
        Ok(OpResult {
            success: true,
            state: Some(SessionState::Terminated),
            message: Some("session terminated".into()),
        })
    }

    /// Terminate every session, swallowing individual failures.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.inner.sessions.read().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.terminate_session(&id).await {
                tracing::warn!(session = %id, "shutdown: {e}");
            }
        }
    }

    // -----------------------------------------------------------------
    // Breakpoints
    // -----------------------------------------------------------------

    /// Set or update a breakpoint. Before the session reaches `ready` the
    /// breakpoint is queued and reported as pending; with a live adapter
    /// the file's full set is re-issued and the adapter's verdict applied.
    pub async fn set_breakpoint(
        &self,
        session_id: &str,
        spec: BreakpointSpec,
    ) -> Result<BreakpointResult, SessionError> {
        let session = self.get(session_id).await?;
        let mut data = session.lock().await;

        let file = normalize_path(&spec.file, data.cwd.as_deref());
        let mut bp = SessionBreakpoint::new(file.clone(), spec.line);
        bp.column = spec.column;
        bp.condition = spec.condition;
        bp.hit_condition = spec.hit_condition;
        bp.log_message = spec.log_message;
        bp.trace = spec.trace;
        bp.dump_file = spec.dump_file;
        bp.max_dumps = spec.max_dumps;
        data.breakpoints.upsert(bp);

        if !data.state.has_adapter() {
            return Ok(BreakpointResult {
                success: true,
                breakpoint: data.breakpoints.at(&file, spec.line).cloned(),
                message: Some("breakpoint pending until debugging starts".into()),
            });
        }

        let Some(client) = data.client.clone() else {
            return Ok(BreakpointResult {
                success: false,
                breakpoint: data.breakpoints.at(&file, spec.line).cloned(),
                message: Some("session has no adapter client".into()),
            });
        };

        let index = data
            .breakpoints
            .lines_for_file(&file)
            .iter()
            .position(|l| *l == spec.line);
        let wire = data.breakpoints.source_breakpoints(&file);
        match client.set_breakpoints(&file, wire).await {
            Ok(acks) => {
                data.breakpoints.apply_ack(&file, &acks);
                let breakpoint = index
                    .and_then(|i| data.breakpoints.for_file(&file).get(i))
                    .cloned();
                Ok(BreakpointResult {
                    success: true,
                    breakpoint,
                    message: None,
                })
            }
            Err(e) => Ok(BreakpointResult {
                success: false,
                breakpoint: data.breakpoints.at(&file, spec.line).cloned(),
                message: Some(e.to_string()),
            }),
        }
    }

    /// Remove a breakpoint and re-issue the file's remaining set.
    pub async fn remove_breakpoint(
        &self,
        session_id: &str,
        file: PathBuf,
        line: i64,
    ) -> Result<OpResult, SessionError> {
        let session = self.get(session_id).await?;
        let mut data = session.lock().await;

        let file = normalize_path(&file, data.cwd.as_deref());
        if !data.breakpoints.remove(&file, line) {
            return Ok(OpResult::fail(
                Some(data.state),
                format!("no breakpoint at {}:{line}", file.display()),
            ));
        }

        if data.state.has_adapter() {
            if let Some(client) = data.client.clone() {
                let wire = data.breakpoints.source_breakpoints(&file);
                match client.set_breakpoints(&file, wire).await {
                    Ok(acks) => data.breakpoints.apply_ack(&file, &acks),
                    Err(e) => {
                        return Ok(OpResult::fail(
                            Some(data.state),
                            format!("breakpoint removed locally, adapter update failed: {e}"),
                        ))
                    }
                }
            }
        }
        Ok(OpResult::ok(data.state))
    }

    /// All breakpoints of a session.
    pub async fn list_breakpoints(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionBreakpoint>, SessionError> {
        let session = self.get(session_id).await?;
        let data = session.lock().await;
        Ok(data.breakpoints.all())
    }

    // -----------------------------------------------------------------
    // Traces
    // -----------------------------------------------------------------

    /// Query collected traces.
    pub async fn get_traces(
        &self,
        session_id: &str,
        filter: TraceFilter,
    ) -> Result<TracesPage, SessionError> {
        let session = self.get(session_id).await?;
        let data = session.lock().await;
        let (traces, total) = data.traces.query(&filter);
        Ok(TracesPage { traces, total })
    }

    /// Drop all collected traces, returning how many were dropped.
    pub async fn clear_traces(&self, session_id: &str) -> Result<usize, SessionError> {
        let session = self.get(session_id).await?;
        let mut data = session.lock().await;
        Ok(data.traces.clear())
    }

    // -----------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------

    pub(crate) fn spawn_event_pump(
        self,
        session_id: String,
        mut rx: mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        tokio::spawn(async move {
            while let Some(client_event) = rx.recv().await {
                match client_event {
                    ClientEvent::Event(event) => match event.event.as_str() {
                        "stopped" => self.on_stopped(&session_id, &event).await,
                        "continued" => self.on_continued(&session_id).await,
                        "exited" => self.on_exited(&session_id, &event).await,
                        "terminated" => self.on_terminated(&session_id).await,
                        "output" => self.on_output(&session_id, &event).await,
                        other => {
                            tracing::trace!(session = %session_id, event = %other, "adapter event");
                        }
                    },
                    ClientEvent::Closed { reason } => {
                        self.on_connection_closed(&session_id, &reason).await;
                    }
                    ClientEvent::AdapterExited { code } => {
                        tracing::info!(session = %session_id, code, "adapter process exited");
                        self.on_terminated(&session_id).await;
                    }
                }
            }
        });
    }

    /// The primary connection dropped without a `terminated` event — a
    /// broken pipe, TCP reset, or fatal codec error. Without this edge the
    /// session would sit in `running`/`paused` forever.
    async fn on_connection_closed(&self, session_id: &str, reason: &str) {
        let Ok(session) = self.get(session_id).await else {
            return;
        };
        {
            let data = session.lock().await;
            if matches!(data.state, SessionState::Terminated | SessionState::Error) {
                return;
            }
        }
        tracing::warn!(session = %session_id, "adapter connection closed: {reason}");
        self.inner
            .bus
            .publish(SessionEvent::Error {
                session_id: session_id.to_string(),
                message: format!("adapter connection closed: {reason}"),
            })
            .await;
        self.on_terminated(session_id).await;
    }

    /// The stopped-event handler: refresh thread/frame, capture locals,
    /// then either surface the stop or let the tracepoint engine swallow
    /// it and auto-continue.
    async fn on_stopped(&self, session_id: &str, event: &Event) {
        let Ok(session) = self.get(session_id).await else {
            return;
        };
        let body: StoppedEventBody = event
            .body
            .clone()
            .and_then(|b| serde_json::from_value(b).ok())
            .unwrap_or(StoppedEventBody {
                reason: "unknown".into(),
                description: None,
                thread_id: None,
                all_threads_stopped: None,
                text: None,
            });

        let mut data = session.lock().await;
        let Some(client) = data.client.clone() else {
            return;
        };

        data.current_thread_id = body.thread_id.unwrap_or(1);
        data.stopped_reason = Some(body.reason.clone());
        data.stopped_thread_id = Some(data.current_thread_id);

        // Refresh the frame id before any inspection call can observe the
        // stop, and cache {top frame, locals} as the stop context.
        let frames = client
            .stack_trace(data.current_thread_id)
            .await
            .unwrap_or_default();
        let top = frames.first().cloned();
        if let Some(frame) = &top {
            data.current_frame_id = Some(frame.id);
        }

        let mut locals = Vec::new();
        if let Some(frame) = &top {
            match client.scopes(frame.id).await {
                Ok(scopes) => {
                    let local = scopes
                        .iter()
                        .find(|s| s.name.to_lowercase().contains("local"));
                    if let Some(scope) = local {
                        locals = client
                            .variables(scope.variables_reference)
                            .await
                            .unwrap_or_default();
                    }
                }
                Err(e) => {
                    tracing::debug!(session = %session_id, "scopes at stop failed: {e}");
                }
            }
        }
        data.last_stop = top.clone().map(|frame| StopContext {
            frame,
            variables: locals.clone(),
        });

        if let Some(frame) = &top {
            if self.run_tracepoint(&mut data, frame, &locals).await {
                return;
            }
        }

        self.transition(&mut data, SessionState::Paused).await;
        data.notify_pause_waiters();
        self.inner
            .bus
            .publish(SessionEvent::Stopped {
                session_id: data.id.clone(),
                reason: body.reason,
                thread_id: data.current_thread_id,
                description: body.description,
            })
            .await;
    }

    /// Tracepoint engine. Returns `true` when the stop was swallowed: the
    /// snapshot is recorded and a deferred continue keeps the session
    /// logically running. The first hit beyond `max_dumps` falls through
    /// to the normal pause path without a new snapshot.
    async fn run_tracepoint(
        &self,
        data: &mut SessionData,
        frame: &dapmux_dap::StackFrame,
        locals: &[dapmux_dap::Variable],
    ) -> bool {
        let Some(path) = frame.source_path().map(PathBuf::from) else {
            return false;
        };
        let max_variables = self.inner.config.traces.variables_per_trace;

        let Some(bp) = data.breakpoints.dump_target_mut(&path, frame.line) else {
            return false;
        };
        if bp.max_dumps.is_some_and(|max| bp.dump_count >= max) {
            // Budget exhausted: surface this stop normally.
            return false;
        }

        bp.dump_count += 1;
        let hit = bp.dump_count;
        let dump_file = bp.dump_file.clone();

        let trace = TracePoint::capture(hit, frame, locals, max_variables);
        if let Some(path) = dump_file {
            if let Err(e) = append_jsonl(&path, &trace).await {
                tracing::warn!(
                    session = %data.id,
                    file = %path.display(),
                    "trace dump write failed: {e}"
                );
            }
        }
        data.traces.push(trace);

        // Continue off the event handler: never reenter dispatch from
        // inside it.
        let client = data.client.clone();
        let thread_id = data.current_thread_id;
        let session_id = data.id.clone();
        tokio::spawn(async move {
            if let Some(client) = client {
                if let Err(e) = client.continue_execution(thread_id).await {
                    tracing::warn!(session = %session_id, "tracepoint auto-continue failed: {e}");
                }
            }
        });
        true
    }

    async fn on_continued(&self, session_id: &str) {
        let Ok(session) = self.get(session_id).await else {
            return;
        };
        let mut data = session.lock().await;
        if data.state == SessionState::Paused {
            self.transition(&mut data, SessionState::Running).await;
        }
    }

    async fn on_exited(&self, session_id: &str, event: &Event) {
        let Ok(session) = self.get(session_id).await else {
            return;
        };
        let body: Option<ExitedEventBody> = event
            .body
            .clone()
            .and_then(|b| serde_json::from_value(b).ok());
        let mut data = session.lock().await;
        data.exit_code = body.map(|b| b.exit_code);
    }

    async fn on_terminated(&self, session_id: &str) {
        let Ok(session) = self.get(session_id).await else {
            return;
        };
        {
            let mut data = session.lock().await;
            if data.state == SessionState::Terminated {
                return;
            }
            self.transition(&mut data, SessionState::Terminated).await;
            data.notify_pause_waiters();
            self.inner
                .bus
                .publish(SessionEvent::Terminated {
                    session_id: data.id.clone(),
                    exit_code: data.exit_code,
                })
                .await;
        }

        // Leave the final state observable for a grace window, then drop
        // the session from the table.
        let manager = self.clone();
        let id = session_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(TERMINATED_GRACE).await;
            manager.inner.sessions.write().await.remove(&id);
            tracing::debug!(session = %id, "removed terminated session");
        });
    }

    async fn on_output(&self, session_id: &str, event: &Event) {
        let Some(body) = event
            .body
            .clone()
            .and_then(|b| serde_json::from_value::<OutputEventBody>(b).ok())
        else {
            return;
        };
        self.inner
            .bus
            .publish(SessionEvent::Output {
                session_id: session_id.to_string(),
                category: body.category.unwrap_or_else(|| "console".into()),
                output: body.output,
            })
            .await;
    }

    // -----------------------------------------------------------------
    // Pause synchronization
    // -----------------------------------------------------------------

    /// Wait until the session's next stop (or return immediately when it
    /// is already paused). Resolves, never fails, on timeout; callers
    /// treat a missing stop context as "did not stop".
    pub(crate) async fn wait_for_pause(&self, session: &SessionRef, timeout: Duration) {
        let rx = {
            let mut data = session.lock().await;
            if data.state == SessionState::Paused {
                return;
            }
            if !data.state.has_adapter() {
                return;
            }
            let (tx, rx) = tokio::sync::oneshot::channel();
            data.pause_waiters.push(tx);
            rx
        };
        // Waiters are notified after the stop context is populated, so no
        // settling delay is needed here.
        let _ = tokio::time::timeout(timeout, rx).await;
    }

    /// Public wait-for-pause by session id.
    pub async fn wait_for_session_pause(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<SessionState, SessionError> {
        let session = self.get(session_id).await?;
        self.wait_for_pause(&session, timeout).await;
        let state = session.lock().await.state;
        Ok(state)
    }
}
