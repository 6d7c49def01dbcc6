//! High-level DAP client.
//!
//! Owns the adapter process and its primary connection, offers one thin
//! method per DAP request, guards capability-dependent requests, and claims
//! child targets announced via `startDebugging` reverse requests.

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Duration;

use crate::capabilities::AdapterCapabilities;
use crate::connection::{DapConnection, PendingReply, DEFAULT_REQUEST_TIMEOUT};
use crate::error::DapError;
use crate::process::{connect_child, AdapterCommand, AdapterProcess};
use crate::protocol::{
    BreakpointResponse, Capabilities, ContinueArguments, DisconnectArguments, EvaluateArguments,
    EvaluateResponseBody, Event, FunctionBreakpoint, InitializeRequestArguments, NextArguments,
    PauseArguments, Request, Scope, ScopesResponseBody, SetBreakpointsArguments,
    SetBreakpointsResponseBody, Source, SourceBreakpoint, StackFrame, StackTraceArguments,
    StackTraceResponseBody, StartDebuggingRequestArguments, StepInArguments, StepOutArguments,
    Thread, ThreadsResponseBody, Variable, VariablesResponseBody,
};
use crate::router::{ChildSession, SessionRouter};

/// Timeout budgets for a client's connections and teardown.
#[derive(Debug, Clone)]
pub struct ClientTimeouts {
    /// Default per-request timeout on every connection.
    pub request: Duration,
    /// Bound on `disconnect` during teardown.
    pub disconnect: Duration,
    /// Bound on each step of the child-session handshake.
    pub child_handshake: Duration,
    /// Bound on scraping a TCP adapter's listen address.
    pub port_scrape: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            request: DEFAULT_REQUEST_TIMEOUT,
            disconnect: Duration::from_secs(5),
            child_handshake: Duration::from_secs(5),
            port_scrape: Duration::from_secs(10),
        }
    }
}

/// What a client surfaces to its owner: adapter events plus the lifecycle
/// edges that do not arrive as DAP messages. A connection that drops
/// without the adapter process dying (broken pipe, TCP reset, fatal codec
/// error) surfaces as `Closed`.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// An adapter event from the primary or a child connection.
    Event(Event),
    /// The primary connection closed.
    Closed {
        /// Why the stream ended.
        reason: String,
    },
    /// The adapter process exited.
    AdapterExited {
        /// The process exit code.
        code: i32,
    },
}

type ClientSubscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<ClientEvent>>>>;

/// A DAP client driving one adapter process.
pub struct DapClient {
    conn: Arc<DapConnection>,
    process: Mutex<Option<AdapterProcess>>,
    capabilities: RwLock<AdapterCapabilities>,
    router: SessionRouter,
    launch_reply: Mutex<Option<PendingReply>>,
    tcp_addr: Option<(String, u16)>,
    child_adapter_type: String,
    timeouts: ClientTimeouts,
    subscribers: ClientSubscribers,
}

impl DapClient {
    /// Spawn the adapter and wire up the client with default timeouts.
    /// The returned client is shared: its reverse-request loop holds a
    /// reference.
    pub async fn start(cmd: &AdapterCommand) -> Result<Arc<Self>, DapError> {
        Self::start_with_timeouts(cmd, ClientTimeouts::default()).await
    }

    /// [`DapClient::start`] with explicit timeout budgets.
    pub async fn start_with_timeouts(
        cmd: &AdapterCommand,
        timeouts: ClientTimeouts,
    ) -> Result<Arc<Self>, DapError> {
        let (process, conn) =
            AdapterProcess::spawn(cmd, timeouts.port_scrape, timeouts.request).await?;
        let tcp_addr = process.tcp_addr();
        Ok(Self::wire(conn, Some(process), tcp_addr, timeouts).await)
    }

    /// Build a client over an existing connection. Used by tests with
    /// in-memory streams and by the child handshake path.
    pub async fn from_connection(
        conn: Arc<DapConnection>,
        tcp_addr: Option<(String, u16)>,
    ) -> Arc<Self> {
        Self::wire(conn, None, tcp_addr, ClientTimeouts::default()).await
    }

    async fn wire(
        conn: Arc<DapConnection>,
        process: Option<AdapterProcess>,
        tcp_addr: Option<(String, u16)>,
        timeouts: ClientTimeouts,
    ) -> Arc<Self> {
        let exited = process.as_ref().map(|p| p.exited());
        let client = Arc::new(Self {
            conn: conn.clone(),
            process: Mutex::new(process),
            capabilities: RwLock::new(AdapterCapabilities::default()),
            router: SessionRouter::new(),
            launch_reply: Mutex::new(None),
            tcp_addr,
            child_adapter_type: "pwa-node".into(),
            timeouts,
            subscribers: Arc::new(Mutex::new(Vec::new())),
        });

        let reverse_rx = conn.take_reverse_requests().await;
        tokio::spawn(reverse_request_loop(client.clone(), reverse_rx));

        // Lifecycle fan-out: adapter events stream through until the
        // connection dies, then the close reason is surfaced. The event
        // stream ends exactly when the connection closes.
        let subscribers = client.subscribers.clone();
        let mut events = conn.subscribe().await;
        let mut closed = conn.closed();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                broadcast(&subscribers, ClientEvent::Event(event)).await;
            }
            let _ = closed.wait_for(|r| r.is_some()).await;
            let reason = closed
                .borrow()
                .clone()
                .unwrap_or_else(|| "stream ended".into());
            broadcast(&subscribers, ClientEvent::Closed { reason }).await;
        });

        // Process exit is a distinct edge: the adapter can die while a
        // socket lingers, and vice versa.
        if let Some(mut exited) = exited {
            let subscribers = client.subscribers.clone();
            tokio::spawn(async move {
                if exited.wait_for(|code| code.is_some()).await.is_ok() {
                    let code = exited.borrow().unwrap_or(-1);
                    broadcast(&subscribers, ClientEvent::AdapterExited { code }).await;
                }
            });
        }

        client
    }

    /// The primary connection.
    pub fn connection(&self) -> Arc<DapConnection> {
        self.conn.clone()
    }

    /// Resolved adapter capabilities (empty until `initialize`).
    pub async fn capabilities(&self) -> AdapterCapabilities {
        self.capabilities.read().await.clone()
    }

    /// Subscribe to the client's event stream: adapter events (primary
    /// and child connections; child events are forwarded through the
    /// primary dispatch path) plus connection-close and process-exit
    /// edges.
    pub async fn subscribe_events(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Arm a one-shot waiter for a named event before issuing the request
    /// that triggers it.
    pub async fn register_event_waiter(
        &self,
        name: &str,
    ) -> tokio::sync::oneshot::Receiver<Event> {
        self.conn.register_event_waiter(name).await
    }

    /// Kill the adapter process.
    pub async fn kill(&self) {
        if let Some(process) = self.process.lock().await.as_mut() {
            process.kill();
        }
    }

    /// Whether a child target is currently routed to.
    pub async fn has_active_child(&self) -> bool {
        self.router.active_conn().await.is_some()
    }

    /// Thread- and frame-scoped requests go to the active child session
    /// when one exists, otherwise to the primary connection.
    async fn route(&self) -> Arc<DapConnection> {
        match self.router.active_conn().await {
            Some(child) => child,
            None => self.conn.clone(),
        }
    }

    // -----------------------------------------------------------------
    // DAP request surface
    // -----------------------------------------------------------------

    /// `initialize`: handshake and capability resolution.
    pub async fn initialize(&self, adapter_id: &str) -> Result<AdapterCapabilities, DapError> {
        let args = InitializeRequestArguments::for_adapter(adapter_id);
        let body = self
            .conn
            .send_request("initialize", Some(to_value(&args)?))
            .await?;
        let caps: Capabilities = match body {
            Some(body) => serde_json::from_value(body)
                .map_err(|e| DapError::InvalidResponse(format!("capabilities: {e}")))?,
            None => Capabilities::default(),
        };
        let resolved = AdapterCapabilities::from_initialize_response(&caps);
        *self.capabilities.write().await = resolved.clone();
        Ok(resolved)
    }

    /// Fire-and-forget `launch`. Some adapters (debugpy) hold the launch
    /// response until after `configurationDone`; the response is collected
    /// later via [`DapClient::wait_for_launch`].
    pub async fn launch_async(&self, config: serde_json::Value) -> Result<(), DapError> {
        let (_seq, reply) = self.conn.send_request_async("launch", Some(config)).await?;
        *self.launch_reply.lock().await = Some(reply);
        Ok(())
    }

    /// Wait up to `dur` for the pending `launch` response. Timing out is
    /// not an error; a late response is still collected by a later call.
    /// A failure response is.
    pub async fn wait_for_launch(&self, dur: Duration) -> Result<(), DapError> {
        let mut slot = self.launch_reply.lock().await;
        let Some(reply) = slot.as_mut() else {
            return Ok(());
        };
        match reply.wait(dur).await {
            Some(Ok(_)) => {
                *slot = None;
                Ok(())
            }
            Some(Err(e)) => {
                *slot = None;
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// `attach` to an already-running debuggee.
    pub async fn attach(&self, config: serde_json::Value) -> Result<(), DapError> {
        self.conn.send_request("attach", Some(config)).await?;
        Ok(())
    }

    /// `configurationDone`; a no-op when the adapter does not support it.
    pub async fn configuration_done(&self) -> Result<(), DapError> {
        if !self.capabilities.read().await.configuration_done {
            return Ok(());
        }
        self.conn.send_request("configurationDone", None).await?;
        Ok(())
    }

    /// `setBreakpoints`: atomically replaces the breakpoint set for a file.
    pub async fn set_breakpoints(
        &self,
        path: &Path,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> Result<Vec<BreakpointResponse>, DapError> {
        let args = SetBreakpointsArguments {
            source: Source::from_path(path.to_string_lossy().into_owned()),
            breakpoints: Some(breakpoints),
        };
        let body = self
            .conn
            .send_request("setBreakpoints", Some(to_value(&args)?))
            .await?;
        let body: SetBreakpointsResponseBody = parse_body(body, "setBreakpoints")?;
        Ok(body.breakpoints)
    }

    /// `setFunctionBreakpoints`; empty result when unsupported.
    pub async fn set_function_breakpoints(
        &self,
        breakpoints: Vec<FunctionBreakpoint>,
    ) -> Result<Vec<BreakpointResponse>, DapError> {
        if !self.capabilities.read().await.function_breakpoints {
            return Ok(Vec::new());
        }
        let body = self
            .conn
            .send_request(
                "setFunctionBreakpoints",
                Some(serde_json::json!({ "breakpoints": breakpoints })),
            )
            .await?;
        let body: SetBreakpointsResponseBody = parse_body(body, "setFunctionBreakpoints")?;
        Ok(body.breakpoints)
    }

    /// `setExceptionBreakpoints`; a no-op when the adapter advertises no
    /// exception filters.
    pub async fn set_exception_breakpoints(&self, filters: Vec<String>) -> Result<(), DapError> {
        if !self.capabilities.read().await.exception_filters {
            return Ok(());
        }
        self.conn
            .send_request(
                "setExceptionBreakpoints",
                Some(serde_json::json!({ "filters": filters })),
            )
            .await?;
        Ok(())
    }

    /// `threads`.
    pub async fn threads(&self) -> Result<Vec<Thread>, DapError> {
        let body = self.route().await.send_request("threads", None).await?;
        let body: ThreadsResponseBody = parse_body(body, "threads")?;
        Ok(body.threads)
    }

    /// `stackTrace` for the given thread, topmost frame first.
    pub async fn stack_trace(&self, thread_id: i64) -> Result<Vec<StackFrame>, DapError> {
        let args = StackTraceArguments {
            thread_id,
            start_frame: None,
            levels: None,
        };
        let body = self
            .route()
            .await
            .send_request("stackTrace", Some(to_value(&args)?))
            .await?;
        let body: StackTraceResponseBody = parse_body(body, "stackTrace")?;
        Ok(body.stack_frames)
    }

    /// `scopes` for the given frame.
    pub async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>, DapError> {
        let body = self
            .route()
            .await
            .send_request("scopes", Some(serde_json::json!({ "frameId": frame_id })))
            .await?;
        let body: ScopesResponseBody = parse_body(body, "scopes")?;
        Ok(body.scopes)
    }

    /// `variables` for the given reference.
    pub async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>, DapError> {
        let body = self
            .route()
            .await
            .send_request(
                "variables",
                Some(serde_json::json!({ "variablesReference": variables_reference })),
            )
            .await?;
        let body: VariablesResponseBody = parse_body(body, "variables")?;
        Ok(body.variables)
    }

    /// `evaluate` in an optional frame context.
    pub async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: Option<&str>,
    ) -> Result<EvaluateResponseBody, DapError> {
        let args = EvaluateArguments {
            expression: expression.into(),
            frame_id,
            context: context.map(Into::into),
        };
        let body = self
            .route()
            .await
            .send_request("evaluate", Some(to_value(&args)?))
            .await?;
        parse_body(body, "evaluate")
    }

    /// `continue` the given thread.
    pub async fn continue_execution(&self, thread_id: i64) -> Result<(), DapError> {
        let args = ContinueArguments {
            thread_id,
            single_thread: None,
        };
        self.route()
            .await
            .send_request("continue", Some(to_value(&args)?))
            .await?;
        Ok(())
    }

    /// `next` (step over).
    pub async fn next(&self, thread_id: i64) -> Result<(), DapError> {
        let args = NextArguments {
            thread_id,
            granularity: None,
        };
        self.route()
            .await
            .send_request("next", Some(to_value(&args)?))
            .await?;
        Ok(())
    }

    /// `stepIn`.
    pub async fn step_in(&self, thread_id: i64) -> Result<(), DapError> {
        let args = StepInArguments {
            thread_id,
            target_id: None,
            granularity: None,
        };
        self.route()
            .await
            .send_request("stepIn", Some(to_value(&args)?))
            .await?;
        Ok(())
    }

    /// `stepOut`.
    pub async fn step_out(&self, thread_id: i64) -> Result<(), DapError> {
        let args = StepOutArguments {
            thread_id,
            granularity: None,
        };
        self.route()
            .await
            .send_request("stepOut", Some(to_value(&args)?))
            .await?;
        Ok(())
    }

    /// `pause` the given thread.
    pub async fn pause(&self, thread_id: i64) -> Result<(), DapError> {
        let args = PauseArguments { thread_id };
        self.route()
            .await
            .send_request("pause", Some(to_value(&args)?))
            .await?;
        Ok(())
    }

    /// `terminate` the debuggee; a no-op when unsupported.
    pub async fn terminate(&self) -> Result<(), DapError> {
        if !self.capabilities.read().await.terminate {
            return Ok(());
        }
        self.conn.send_request("terminate", None).await?;
        Ok(())
    }

    /// `disconnect`, asking the adapter to terminate the debuggee. Bounded
    /// by a short timeout so teardown cannot hang.
    pub async fn disconnect(&self, terminate_debuggee: bool) -> Result<(), DapError> {
        let args = DisconnectArguments {
            restart: Some(false),
            terminate_debuggee: Some(terminate_debuggee),
            suspend_debuggee: None,
        };
        self.conn
            .send_request_with_timeout(
                "disconnect",
                Some(to_value(&args)?),
                self.timeouts.disconnect,
            )
            .await?;
        Ok(())
    }
}

async fn broadcast(subscribers: &ClientSubscribers, event: ClientEvent) {
    subscribers
        .lock()
        .await
        .retain(|sub| sub.send(event.clone()).is_ok());
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, DapError> {
    serde_json::to_value(value)
        .map_err(|e| DapError::InvalidResponse(format!("argument serialization failed: {e}")))
}

fn parse_body<T: DeserializeOwned>(
    body: Option<serde_json::Value>,
    command: &str,
) -> Result<T, DapError> {
    let body =
        body.ok_or_else(|| DapError::InvalidResponse(format!("'{command}' response had no body")))?;
    serde_json::from_value(body)
        .map_err(|e| DapError::InvalidResponse(format!("'{command}' body: {e}")))
}

// ---------------------------------------------------------------------------
// Reverse requests
// ---------------------------------------------------------------------------

async fn reverse_request_loop(client: Arc<DapClient>, mut rx: mpsc::UnboundedReceiver<Request>) {
    while let Some(request) = rx.recv().await {
        match request.command.as_str() {
            "startDebugging" => {
                // The handshake opens a new connection and must not stall
                // event processing or later reverse requests.
                let client = client.clone();
                tokio::spawn(async move {
                    handle_start_debugging(client, request).await;
                });
            }
            other => {
                tracing::debug!("rejecting reverse request '{other}'");
                let _ = client.conn.send_response(
                    request.seq,
                    other,
                    false,
                    Some(format!("reverse request '{other}' not supported")),
                    None,
                );
            }
        }
    }
}

async fn handle_start_debugging(client: Arc<DapClient>, request: Request) {
    let request_seq = request.seq;
    match claim_target(&client, request).await {
        Ok(target_id) => {
            tracing::info!(%target_id, "claimed child debug target");
            let _ = client
                .conn
                .send_response(request_seq, "startDebugging", true, None, None);
        }
        Err(e) => {
            tracing::warn!("startDebugging handshake failed: {e}");
            let _ = client.conn.send_response(
                request_seq,
                "startDebugging",
                false,
                Some(e.to_string()),
                None,
            );
        }
    }
}

/// Claim one child target: open a fresh TCP connection to the adapter,
/// run initialize → attach(`__pendingTargetId`) → configurationDone on it,
/// and make it the active routing target. An `attach` timeout is tolerated;
/// some adapter versions answer it only after the target runs.
async fn claim_target(client: &Arc<DapClient>, request: Request) -> Result<String, DapError> {
    let args: StartDebuggingRequestArguments = request
        .arguments
        .ok_or_else(|| DapError::InvalidResponse("startDebugging without arguments".into()))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| DapError::InvalidResponse(format!("startDebugging arguments: {e}")))
        })?;
    let target_id = args
        .pending_target_id()
        .ok_or_else(|| DapError::InvalidResponse("startDebugging without __pendingTargetId".into()))?
        .to_string();

    let (host, port) = client.tcp_addr.clone().ok_or_else(|| {
        DapError::Transport("adapter has no TCP address for child sessions".into())
    })?;
    let child_conn = connect_child(&host, port, client.timeouts.request).await?;

    let handshake_step = client.timeouts.child_handshake;
    let init_args = InitializeRequestArguments::for_adapter(&client.child_adapter_type);
    child_conn
        .send_request_with_timeout("initialize", Some(to_value(&init_args)?), handshake_step)
        .await?;

    let attach_args = serde_json::json!({
        "type": client.child_adapter_type,
        "__pendingTargetId": target_id,
    });
    match child_conn
        .send_request_with_timeout("attach", Some(attach_args), handshake_step)
        .await
    {
        Ok(_) => {}
        Err(DapError::Timeout { .. }) => {
            tracing::warn!(%target_id, "child attach timed out; proceeding");
        }
        Err(e) => return Err(e),
    }

    child_conn
        .send_request_with_timeout("configurationDone", None, handshake_step)
        .await?;

    // Child events surface through the primary dispatch path so stopped /
    // continued / output look identical to the session layer.
    let mut child_events = child_conn.subscribe().await;
    let primary = client.conn.clone();
    tokio::spawn(async move {
        while let Some(event) = child_events.recv().await {
            primary.inject_event(event).await;
        }
    });

    // Drop the child from the routing table when its connection closes.
    let mut closed = child_conn.closed();
    let router_client = client.clone();
    let closing_target = target_id.clone();
    tokio::spawn(async move {
        if closed.wait_for(|r| r.is_some()).await.is_ok() {
            tracing::debug!(target_id = %closing_target, "child session closed");
            router_client.router.remove(&closing_target).await;
        }
    });

    client
        .router
        .add(
            ChildSession {
                target_id: target_id.clone(),
                conn: child_conn,
            },
            true,
        )
        .await;

    Ok(target_id)
}
