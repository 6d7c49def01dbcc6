//! End-to-end scenarios against a real debugpy. Ignored by default; run
//! with `cargo test -- --ignored` on a machine with debugpy installed
//! (`python3 -m pip install debugpy`).

use std::path::PathBuf;
use std::time::Duration;

use dapmux_adapters::{Language, LaunchParams};
use dapmux_config::DapmuxConfig;
use dapmux_session::{
    BreakpointSpec, ContinueOptions, SessionManager, SessionState, StepKind,
};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Line of `numbers = [...]` inside main() in sample.py.
const SAMPLE_BP_LINE: i64 = 9;
/// Line of `total += i` inside the loop body in loop.py.
const LOOP_BODY_LINE: i64 = 4;

async fn start_python(script: &str, bp_line: i64, spec_extras: BreakpointSpec) -> (SessionManager, String) {
    let manager = SessionManager::new(DapmuxConfig::default());
    let session = manager
        .create_session(Language::Python, None, None)
        .await;

    let script_path = fixture(script);
    manager
        .set_breakpoint(
            &session.id,
            BreakpointSpec {
                file: script_path.clone(),
                line: bp_line,
                ..spec_extras
            },
        )
        .await
        .unwrap();

    let started = manager
        .start_debugging(
            &session.id,
            LaunchParams {
                script_path,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(started.success, "start failed: {:?}", started.message);

    (manager, session.id)
}

#[tokio::test]
#[ignore = "requires python3 with debugpy installed"]
async fn python_hits_breakpoint_and_inspects_locals() {
    let (manager, id) = start_python("sample.py", SAMPLE_BP_LINE, BreakpointSpec::default()).await;

    let state = manager
        .wait_for_session_pause(&id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(state, SessionState::Paused);

    let info = manager.session_info(&id).await.unwrap();
    assert_eq!(info.stopped_reason.as_deref(), Some("breakpoint"));

    let frames = manager.get_stack_trace(&id, None).await.unwrap();
    assert!(!frames.is_empty());
    let top = &frames[0];
    assert!(top.source_path().unwrap().ends_with("sample.py"));
    assert_eq!(top.line, SAMPLE_BP_LINE);

    // Step over the assignment, then its local must exist.
    let step = manager.step(&id, StepKind::Over, None).await.unwrap();
    assert!(step.success);
    let vars = manager
        .get_variables(&id, None, Some("local"))
        .await
        .unwrap();
    assert!(vars.iter().any(|v| v.name == "numbers"));

    manager.terminate_session(&id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires python3 with debugpy installed"]
async fn python_tracepoint_emits_jsonl_without_pausing() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("loop.jsonl");

    let (manager, id) = start_python(
        "loop.py",
        LOOP_BODY_LINE,
        BreakpointSpec {
            trace: true,
            dump_file: Some(dump.clone()),
            max_dumps: Some(5),
            ..Default::default()
        },
    )
    .await;

    // Give the loop time to run through its tracepoint hits.
    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    loop {
        let traces = manager
            .get_traces(&id, Default::default())
            .await
            .unwrap();
        if traces.total >= 5 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "tracepoint hits never accumulated: {}",
            traces.total
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let content = std::fs::read_to_string(&dump).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 5);
    for (i, line) in lines.iter().enumerate() {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["hitNumber"], (i + 1) as i64);
    }

    manager.terminate_session(&id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires python3 with debugpy installed"]
async fn python_collect_hits_gathers_loop_iterations() {
    let (manager, id) = start_python("loop.py", LOOP_BODY_LINE, BreakpointSpec::default()).await;

    let state = manager
        .wait_for_session_pause(&id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(state, SessionState::Paused);

    let result = manager
        .continue_session(
            &id,
            None,
            ContinueOptions {
                wait_for_breakpoint: false,
                timeout_ms: Some(20_000),
                collect_hits: Some(5),
            },
        )
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.traces.unwrap().len(), 5);

    manager.terminate_session(&id).await.unwrap();
}
