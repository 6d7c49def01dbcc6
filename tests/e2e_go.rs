//! End-to-end scenario against a real Delve. Ignored by default; run with
//! `cargo test -- --ignored` on a machine with dlv on PATH.

use std::path::PathBuf;
use std::time::Duration;

use dapmux_adapters::{Language, LaunchParams};
use dapmux_config::DapmuxConfig;
use dapmux_session::{BreakpointSpec, SessionManager, SessionState, StepKind};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Line of `result := calculate(a, b)` in main.go.
const GO_BP_LINE: i64 = 14;

#[tokio::test]
#[ignore = "requires dlv installed"]
async fn go_step_over_advances_line() {
    let manager = SessionManager::new(DapmuxConfig::default());
    let session = manager.create_session(Language::Go, None, None).await;

    let script_path = fixture("main.go");
    manager
        .set_breakpoint(
            &session.id,
            BreakpointSpec {
                file: script_path.clone(),
                line: GO_BP_LINE,
                ..Default::default()
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

    let state = manager
        .wait_for_session_pause(&session.id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(state, SessionState::Paused);

    let frames = manager.get_stack_trace(&session.id, None).await.unwrap();
    assert!(frames[0].source_path().unwrap().ends_with("main.go"));
    assert_eq!(frames[0].line, GO_BP_LINE);

    let step = manager
        .step(&session.id, StepKind::Over, None)
        .await
        .unwrap();
    assert!(step.success);
    let frame = step.stopped_at.expect("stop context after step");
    assert_eq!(frame.line, GO_BP_LINE + 1);

    manager.terminate_session(&session.id).await.unwrap();
}
