//! Multi-session routing against a mock vscode-js-debug.
//!
//! The mock announces a child target via a `startDebugging` reverse
//! request; the client must open a second connection, run the child
//! handshake on it, and from then on route thread-scoped requests there.

mod support;

use std::time::Duration;

use tokio::net::TcpListener;

use dapmux_dap::{ClientEvent, DapClient};
use support::{mock_connection, wrap_tcp};

#[tokio::test]
async fn start_debugging_claims_child_and_routes_requests() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (conn, mut primary) = mock_connection();
    let client = DapClient::from_connection(conn, Some(("127.0.0.1".into(), port))).await;
    assert!(!client.has_active_child().await);

    // Adapter announces a new target.
    primary
        .send_reverse_request(
            77,
            "startDebugging",
            Some(serde_json::json!({
                "request": "attach",
                "configuration": {
                    "type": "pwa-node",
                    "__pendingTargetId": "target-A"
                }
            })),
        )
        .await;

    // The client connects back; run the adapter side of the handshake.
    let (child_stream, _) = listener.accept().await.unwrap();
    let mut child = wrap_tcp(child_stream);

    let init = child.expect_request("initialize").await;
    let args = init.arguments.clone().unwrap();
    assert_eq!(args["supportsStartDebuggingRequest"], true);
    child
        .respond(
            &init,
            Some(serde_json::json!({"supportsConfigurationDoneRequest": true})),
        )
        .await;

    let attach = child.expect_request("attach").await;
    let args = attach.arguments.clone().unwrap();
    assert_eq!(args["__pendingTargetId"], "target-A");
    assert_eq!(args["type"], "pwa-node");
    child.respond(&attach, None).await;

    let done = child.expect_request("configurationDone").await;
    child.respond(&done, None).await;

    // The original reverse request is answered success.
    let reply = primary.expect_response().await;
    assert_eq!(reply.request_seq, 77);
    assert_eq!(reply.command, "startDebugging");
    assert!(reply.success);
    assert!(client.has_active_child().await);

    // Thread-scoped requests now land on the child connection.
    let threads_task = {
        let client = client.clone();
        tokio::spawn(async move { client.threads().await })
    };
    let threads = child.expect_request("threads").await;
    child
        .respond(
            &threads,
            Some(serde_json::json!({"threads": [{"id": 7, "name": "child-main"}]})),
        )
        .await;
    let result = threads_task.await.unwrap().unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, 7);

    let trace_task = {
        let client = client.clone();
        tokio::spawn(async move { client.stack_trace(7).await })
    };
    let stack = child.expect_request("stackTrace").await;
    child
        .respond(
            &stack,
            Some(serde_json::json!({
                "stackFrames": [
                    {"id": 1, "name": "handler", "line": 3, "column": 1,
                     "source": {"path": "/w/app.js"}}
                ]
            })),
        )
        .await;
    let frames = trace_task.await.unwrap().unwrap();
    assert_eq!(frames[0].name, "handler");
}

#[tokio::test]
async fn child_events_surface_through_primary_subscription() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (conn, mut primary) = mock_connection();
    let client = DapClient::from_connection(conn, Some(("127.0.0.1".into(), port))).await;
    let mut events = client.subscribe_events().await;

    primary
        .send_reverse_request(
            1,
            "startDebugging",
            Some(serde_json::json!({
                "request": "attach",
                "configuration": {"__pendingTargetId": "t1"}
            })),
        )
        .await;

    let (child_stream, _) = listener.accept().await.unwrap();
    let mut child = wrap_tcp(child_stream);
    let init = child.expect_request("initialize").await;
    child.respond(&init, None).await;
    let attach = child.expect_request("attach").await;
    child.respond(&attach, None).await;
    let done = child.expect_request("configurationDone").await;
    child.respond(&done, None).await;
    assert!(primary.expect_response().await.success);

    // A stopped event on the child connection reaches primary subscribers.
    child
        .send_event(
            "stopped",
            Some(serde_json::json!({"reason": "breakpoint", "threadId": 7})),
        )
        .await;

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event should be forwarded")
        .unwrap();
    let ClientEvent::Event(event) = event else {
        panic!("expected adapter event, got {event:?}");
    };
    assert_eq!(event.event, "stopped");
    assert_eq!(event.body.unwrap()["threadId"], 7);
}

#[tokio::test]
async fn closed_child_clears_routing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (conn, mut primary) = mock_connection();
    let client = DapClient::from_connection(conn, Some(("127.0.0.1".into(), port))).await;

    primary
        .send_reverse_request(
            5,
            "startDebugging",
            Some(serde_json::json!({
                "request": "attach",
                "configuration": {"__pendingTargetId": "t1"}
            })),
        )
        .await;

    let (child_stream, _) = listener.accept().await.unwrap();
    let mut child = wrap_tcp(child_stream);
    let init = child.expect_request("initialize").await;
    child.respond(&init, None).await;
    let attach = child.expect_request("attach").await;
    child.respond(&attach, None).await;
    let done = child.expect_request("configurationDone").await;
    child.respond(&done, None).await;
    assert!(primary.expect_response().await.success);
    assert!(client.has_active_child().await);

    // Drop the child socket; the active pointer must clear.
    drop(child);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if !client.has_active_child().await {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "child routing was not cleared"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Requests fall back to the primary connection.
    let threads_task = {
        let client = client.clone();
        tokio::spawn(async move { client.threads().await })
    };
    let threads = primary.expect_request("threads").await;
    primary
        .respond(&threads, Some(serde_json::json!({"threads": []})))
        .await;
    assert!(threads_task.await.unwrap().unwrap().is_empty());
}

#[tokio::test]
async fn start_debugging_without_target_id_is_rejected() {
    let (conn, mut primary) = mock_connection();
    let _client = DapClient::from_connection(conn, Some(("127.0.0.1".into(), 1))).await;

    primary
        .send_reverse_request(
            9,
            "startDebugging",
            Some(serde_json::json!({
                "request": "launch",
                "configuration": {}
            })),
        )
        .await;

    let reply = primary.expect_response().await;
    assert_eq!(reply.request_seq, 9);
    assert!(!reply.success);
}
