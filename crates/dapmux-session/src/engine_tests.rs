//! Engine tests: the stopped-event handler, tracepoint auto-continue, and
//! the waiting continue modes, driven against a scripted in-memory adapter.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration, Instant};

use dapmux_adapters::Language;
use dapmux_config::DapmuxConfig;
use dapmux_dap::{
    encode_message, DapClient, DapConnection, Event, FrameDecoder, Message, Request, Response,
};

use crate::events::SessionEvent;
use crate::manager::{BreakpointSpec, SessionManager};
use crate::session::SessionState;
use crate::stepping::{ContinueOptions, StepKind, StepTraceOptions};
use crate::trace::TraceFilter;

/// Scripted debuggee: a loop "spinning" at one line. Each `continue` or
/// step produces another stop while `stops_remaining` lasts.
struct Script {
    file: String,
    line: i64,
    function: String,
    stops_remaining: u32,
}

impl Script {
    fn looping(stops: u32) -> Self {
        Self {
            file: "/w/loop.py".into(),
            line: 14,
            function: "spin".into(),
            stops_remaining: stops,
        }
    }
}

type SharedWriter = Arc<Mutex<WriteHalf<DuplexStream>>>;

async fn write_msg(writer: &SharedWriter, msg: &Message) {
    let bytes = encode_message(&serde_json::to_value(msg).unwrap());
    writer.lock().await.write_all(&bytes).await.unwrap();
}

fn response(req: &Request, body: Option<serde_json::Value>) -> Message {
    Message::Response(Response {
        seq: 1000 + req.seq,
        request_seq: req.seq,
        success: true,
        command: req.command.clone(),
        message: None,
        body,
    })
}

fn stopped_event(reason: &str) -> Message {
    Message::Event(Event {
        seq: 0,
        event: "stopped".into(),
        body: Some(serde_json::json!({"reason": reason, "threadId": 1})),
    })
}

/// The adapter side: answer inspection requests from the script state and
/// produce a follow-up stop after each continue/step while stops remain.
async fn run_adapter(
    mut reader: tokio::io::ReadHalf<DuplexStream>,
    writer: SharedWriter,
    script: Arc<Mutex<Script>>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);
        while let Ok(Some(value)) = decoder.try_parse() {
            let Ok(Message::Request(req)) = serde_json::from_value::<Message>(value) else {
                continue;
            };
            match req.command.as_str() {
                "stackTrace" => {
                    let s = script.lock().await;
                    let body = serde_json::json!({
                        "stackFrames": [{
                            "id": 1,
                            "name": s.function,
                            "line": s.line,
                            "column": 1,
                            "source": {"path": s.file}
                        }]
                    });
                    write_msg(&writer, &response(&req, Some(body))).await;
                }
                "scopes" => {
                    let body = serde_json::json!({
                        "scopes": [
                            {"name": "Locals", "variablesReference": 100},
                            {"name": "Globals", "variablesReference": 200}
                        ]
                    });
                    write_msg(&writer, &response(&req, Some(body))).await;
                }
                "variables" => {
                    let reference = req
                        .arguments
                        .as_ref()
                        .and_then(|a| a.get("variablesReference"))
                        .and_then(|v| v.as_i64())
                        .unwrap_or(0);
                    let s = script.lock().await;
                    let vars = if reference == 100 {
                        serde_json::json!([
                            {"name": "total", "value": s.line.to_string(), "type": "int"},
                            {"name": "item", "value": "10", "type": "int"}
                        ])
                    } else {
                        serde_json::json!([
                            {"name": "GLOBAL_FLAG", "value": "true", "type": "bool"}
                        ])
                    };
                    write_msg(
                        &writer,
                        &response(&req, Some(serde_json::json!({"variables": vars}))),
                    )
                    .await;
                }
                "continue" | "next" | "stepIn" | "stepOut" => {
                    write_msg(&writer, &response(&req, None)).await;
                    let stop = {
                        let mut s = script.lock().await;
                        if req.command != "continue" {
                            s.line += 1;
                        }
                        if s.stops_remaining > 0 {
                            s.stops_remaining -= 1;
                            true
                        } else {
                            false
                        }
                    };
                    if stop {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        let reason = if req.command == "continue" {
                            "breakpoint"
                        } else {
                            "step"
                        };
                        write_msg(&writer, &stopped_event(reason)).await;
                    }
                }
                "threads" => {
                    write_msg(
                        &writer,
                        &response(
                            &req,
                            Some(serde_json::json!({
                                "threads": [{"id": 1, "name": "main"}]
                            })),
                        ),
                    )
                    .await;
                }
                "setBreakpoints" => {
                    let count = req
                        .arguments
                        .as_ref()
                        .and_then(|a| a.get("breakpoints"))
                        .and_then(|b| b.as_array())
                        .map(|b| b.len())
                        .unwrap_or(0);
                    let acks: Vec<serde_json::Value> = (0..count)
                        .map(|i| serde_json::json!({"id": i + 1, "verified": true}))
                        .collect();
                    write_msg(
                        &writer,
                        &response(&req, Some(serde_json::json!({"breakpoints": acks}))),
                    )
                    .await;
                }
                _ => {
                    write_msg(&writer, &response(&req, None)).await;
                }
            }
        }
    }
}

struct Rig {
    manager: SessionManager,
    session_id: String,
    script: Arc<Mutex<Script>>,
    adapter_tx: SharedWriter,
}

impl Rig {
    /// Wire a session to a scripted adapter, entering the `running` state.
    async fn new(script: Script) -> Self {
        let manager = SessionManager::new(DapmuxConfig::default());
        let summary = manager.create_session(Language::Python, None, None).await;
        let script = Arc::new(Mutex::new(script));

        let (client_side, adapter_side) = duplex(256 * 1024);
        let (client_read, client_write) = split(client_side);
        let conn = Arc::new(DapConnection::new(client_read, client_write));
        let client = DapClient::from_connection(conn, None).await;

        let (adapter_read, adapter_write) = split(adapter_side);
        let adapter_tx: SharedWriter = Arc::new(Mutex::new(adapter_write));
        tokio::spawn(run_adapter(adapter_read, adapter_tx.clone(), script.clone()));

        let session = manager.get(&summary.id).await.unwrap();
        {
            let mut data = session.lock().await;
            data.client = Some(client.clone());
            data.state = SessionState::Running;
            data.cwd = Some(PathBuf::from("/w"));
        }
        manager
            .clone()
            .spawn_event_pump(summary.id.clone(), client.subscribe_events().await);

        Self {
            manager,
            session_id: summary.id,
            script,
            adapter_tx,
        }
    }

    /// Deliver a stop as if the debuggee just hit a breakpoint.
    async fn send_stop(&self, reason: &str) {
        write_msg(&self.adapter_tx, &stopped_event(reason)).await;
    }

    /// Drop the adapter's write side, as a broken pipe would.
    async fn close_adapter(&self) {
        let _ = self.adapter_tx.lock().await.shutdown().await;
    }

    async fn state(&self) -> SessionState {
        let session = self.manager.get(&self.session_id).await.unwrap();
        let state = session.lock().await.state;
        state
    }

    async fn trace_hits(&self) -> Vec<u32> {
        let session = self.manager.get(&self.session_id).await.unwrap();
        let data = session.lock().await;
        let (traces, _) = data.traces.query(&TraceFilter::default());
        traces.iter().map(|t| t.hit_number).collect()
    }

    async fn set_tracepoint(&self, max_dumps: Option<u32>, dump_file: Option<PathBuf>) {
        self.manager
            .set_breakpoint(
                &self.session_id,
                BreakpointSpec {
                    file: PathBuf::from("/w/loop.py"),
                    line: 14,
                    trace: true,
                    dump_file,
                    max_dumps,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    async fn wait_for_state(&self, want: SessionState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if self.state().await == want {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "session never reached {want}, still {}",
                self.state().await
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[tokio::test]
async fn stopped_event_caches_context_and_pauses() {
    let rig = Rig::new(Script::looping(0)).await;
    let mut events = rig.manager.subscribe().await;

    rig.send_stop("breakpoint").await;
    rig.wait_for_state(SessionState::Paused).await;

    let session = rig.manager.get(&rig.session_id).await.unwrap();
    let data = session.lock().await;
    assert_eq!(data.stopped_reason.as_deref(), Some("breakpoint"));
    assert_eq!(data.current_thread_id, 1);
    assert_eq!(data.current_frame_id, Some(1));
    let ctx = data.last_stop.as_ref().expect("stop context cached");
    assert_eq!(ctx.frame.line, 14);
    assert_eq!(ctx.frame.name, "spin");
    assert_eq!(ctx.variables.len(), 2);
    assert_eq!(ctx.variables[0].name, "total");
    drop(data);

    // StateChanged(paused) then Stopped were published.
    let mut saw_stopped = false;
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), events.recv()).await {
        if let SessionEvent::Stopped {
            reason, thread_id, ..
        } = event
        {
            assert_eq!(reason, "breakpoint");
            assert_eq!(thread_id, 1);
            saw_stopped = true;
            break;
        }
    }
    assert!(saw_stopped);
}

#[tokio::test]
async fn tracepoint_auto_continues_until_max_dumps() {
    // Breakpoint hit repeatedly: 3 snapshots auto-continue, the 4th hit
    // surfaces as a normal pause without a new snapshot.
    let rig = Rig::new(Script::looping(10)).await;
    rig.set_tracepoint(Some(3), None).await;
    let mut events = rig.manager.subscribe().await;

    rig.send_stop("breakpoint").await;
    rig.wait_for_state(SessionState::Paused).await;

    assert_eq!(rig.trace_hits().await, vec![1, 2, 3]);

    // Exactly one Stopped event reached subscribers: the surfaced pause.
    let mut stopped_count = 0;
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), events.recv()).await {
        if matches!(event, SessionEvent::Stopped { .. }) {
            stopped_count += 1;
        }
    }
    assert_eq!(stopped_count, 1);

    // The breakpoint's budget is exhausted but its count stays at max.
    let session = rig.manager.get(&rig.session_id).await.unwrap();
    let data = session.lock().await;
    let bp = data
        .breakpoints
        .at(std::path::Path::new("/w/loop.py"), 14)
        .unwrap();
    assert_eq!(bp.dump_count, 3);
}

#[tokio::test]
async fn tracepoint_without_max_never_pauses() {
    let rig = Rig::new(Script::looping(4)).await;
    rig.set_tracepoint(None, None).await;
    let mut events = rig.manager.subscribe().await;

    rig.send_stop("breakpoint").await;

    // All five hits (initial + 4 scripted) snapshot and auto-continue.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if rig.trace_hits().await.len() == 5 {
            break;
        }
        assert!(Instant::now() < deadline, "traces never accumulated");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(rig.state().await, SessionState::Running);
    assert_eq!(rig.trace_hits().await, vec![1, 2, 3, 4, 5]);

    while let Ok(Some(event)) = timeout(Duration::from_millis(100), events.recv()).await {
        assert!(
            !matches!(event, SessionEvent::Stopped { .. }),
            "tracepoint hits must not surface as stops"
        );
    }
}

#[tokio::test]
async fn tracepoint_appends_jsonl_dump() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("trace.jsonl");

    let rig = Rig::new(Script::looping(10)).await;
    rig.set_tracepoint(Some(2), Some(dump.clone())).await;

    rig.send_stop("breakpoint").await;
    rig.wait_for_state(SessionState::Paused).await;

    let content = std::fs::read_to_string(&dump).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    for (i, line) in lines.iter().enumerate() {
        let trace: crate::trace::TracePoint = serde_json::from_str(line).unwrap();
        assert_eq!(trace.hit_number, (i + 1) as u32);
        assert_eq!(trace.file, "/w/loop.py");
        assert_eq!(trace.line, 14);
        assert_eq!(trace.function, "spin");
    }
}

#[tokio::test]
async fn step_over_returns_fresh_context() {
    let rig = Rig::new(Script::looping(1)).await;
    rig.send_stop("breakpoint").await;
    rig.wait_for_state(SessionState::Paused).await;

    let result = rig
        .manager
        .step(&rig.session_id, StepKind::Over, None)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.state, SessionState::Paused);
    let frame = result.stopped_at.expect("stop context after step");
    assert_eq!(frame.line, 15);
    let vars = result.variables.unwrap();
    assert_eq!(vars[0].value, "15");
}

#[tokio::test]
async fn continue_wait_for_breakpoint_returns_stop_context() {
    let rig = Rig::new(Script::looping(1)).await;
    rig.send_stop("breakpoint").await;
    rig.wait_for_state(SessionState::Paused).await;

    let result = rig
        .manager
        .continue_session(
            &rig.session_id,
            None,
            ContinueOptions {
                wait_for_breakpoint: true,
                timeout_ms: Some(5_000),
                collect_hits: None,
            },
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.state, SessionState::Paused);
    assert!(result.stopped_at.is_some());
    assert!(result.variables.is_some());
    assert!(result.message.is_none());
}

#[tokio::test]
async fn continue_wait_for_breakpoint_timeout_reports_no_hit() {
    let rig = Rig::new(Script::looping(0)).await;
    rig.send_stop("breakpoint").await;
    rig.wait_for_state(SessionState::Paused).await;

    let result = rig
        .manager
        .continue_session(
            &rig.session_id,
            None,
            ContinueOptions {
                wait_for_breakpoint: true,
                timeout_ms: Some(150),
                collect_hits: None,
            },
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.state, SessionState::Running);
    assert!(result.stopped_at.is_none());
    assert!(result.message.unwrap().contains("no breakpoint hit"));
}

#[tokio::test]
async fn continue_collect_hits_gathers_requested_count() {
    let rig = Rig::new(Script::looping(20)).await;
    rig.send_stop("breakpoint").await;
    rig.wait_for_state(SessionState::Paused).await;

    let result = rig
        .manager
        .continue_session(
            &rig.session_id,
            None,
            ContinueOptions {
                wait_for_breakpoint: false,
                timeout_ms: Some(10_000),
                collect_hits: Some(10),
            },
        )
        .await
        .unwrap();

    assert!(result.success);
    let traces = result.traces.unwrap();
    assert_eq!(traces.len(), 10);
    let hits: Vec<u32> = traces.iter().map(|t| t.hit_number).collect();
    assert_eq!(hits, (1..=10).collect::<Vec<u32>>());
}

#[tokio::test]
async fn step_and_trace_collects_snapshots_per_step() {
    let rig = Rig::new(Script::looping(10)).await;
    rig.send_stop("breakpoint").await;
    rig.wait_for_state(SessionState::Paused).await;

    let result = rig
        .manager
        .step_and_trace(
            &rig.session_id,
            StepTraceOptions {
                count: 4,
                timeout_ms: Some(10_000),
                step_type: StepKind::Over,
                dump_file: None,
            },
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.steps_completed, 4);
    assert_eq!(result.traces.len(), 4);
    // Snapshots capture the pre-step location: 14, 15, 16, 17.
    let lines: Vec<i64> = result.traces.iter().map(|t| t.line).collect();
    assert_eq!(lines, vec![14, 15, 16, 17]);
}

#[tokio::test]
async fn terminated_event_moves_session_to_terminated() {
    let rig = Rig::new(Script::looping(0)).await;
    let mut events = rig.manager.subscribe().await;

    write_msg(
        &rig.adapter_tx,
        &Message::Event(Event {
            seq: 0,
            event: "exited".into(),
            body: Some(serde_json::json!({"exitCode": 3})),
        }),
    )
    .await;
    write_msg(
        &rig.adapter_tx,
        &Message::Event(Event {
            seq: 0,
            event: "terminated".into(),
            body: None,
        }),
    )
    .await;

    rig.wait_for_state(SessionState::Terminated).await;

    // Still listed during the grace window.
    assert_eq!(rig.manager.list_sessions().await.len(), 1);
    let details = rig.manager.session_info(&rig.session_id).await.unwrap();
    assert_eq!(details.exit_code, Some(3));

    let mut saw_terminated = false;
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), events.recv()).await {
        if let SessionEvent::Terminated { exit_code, .. } = event {
            assert_eq!(exit_code, Some(3));
            saw_terminated = true;
        }
    }
    assert!(saw_terminated);
}

#[tokio::test]
async fn connection_close_without_process_exit_terminates_session() {
    let rig = Rig::new(Script::looping(0)).await;
    let mut events = rig.manager.subscribe().await;
    assert_eq!(rig.state().await, SessionState::Running);

    // The stream dies with no adapter process and no terminated event.
    rig.close_adapter().await;
    rig.wait_for_state(SessionState::Terminated).await;

    let mut saw_error = false;
    let mut saw_terminated = false;
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), events.recv()).await {
        match event {
            SessionEvent::Error { message, .. } => {
                assert!(message.contains("connection closed"));
                saw_error = true;
            }
            SessionEvent::Terminated { .. } => saw_terminated = true,
            _ => {}
        }
    }
    assert!(saw_error);
    assert!(saw_terminated);
}

#[tokio::test]
async fn inspection_routes_through_live_adapter() {
    let rig = Rig::new(Script::looping(0)).await;
    rig.send_stop("breakpoint").await;
    rig.wait_for_state(SessionState::Paused).await;

    let threads = rig.manager.get_threads(&rig.session_id).await.unwrap();
    assert_eq!(threads.len(), 1);

    let frames = rig
        .manager
        .get_stack_trace(&rig.session_id, None)
        .await
        .unwrap();
    assert_eq!(frames[0].line, 14);

    // Scope filtering: "local" picks Locals only, "global" Globals only,
    // an unknown filter yields nothing, no filter concatenates both.
    let locals = rig
        .manager
        .get_variables(&rig.session_id, None, Some("local"))
        .await
        .unwrap();
    assert_eq!(locals.len(), 2);

    let globals = rig
        .manager
        .get_variables(&rig.session_id, None, Some("GLOBAL"))
        .await
        .unwrap();
    assert_eq!(globals.len(), 1);
    assert_eq!(globals[0].name, "GLOBAL_FLAG");

    let closures = rig
        .manager
        .get_variables(&rig.session_id, None, Some("closure"))
        .await
        .unwrap();
    assert!(closures.is_empty());

    let all = rig
        .manager
        .get_variables(&rig.session_id, None, None)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
}
