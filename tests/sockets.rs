//! Connection lifecycle: socket nodes, listeners, emitters.

mod common;

use std::time::Duration;

use serde_json::json;

use common::*;
use flowrun::{EngineConfig, RunStatus, WorkflowEngine};

#[tokio::test]
async fn test_web_socket_connects_and_emits() {
    let sockets = FakeSockets::connecting();
    let engine = WorkflowEngine::builder()
        .web_socket(sockets.clone())
        .build()
        .unwrap();

    let data = workflow_data(
        vec![
            node("start", "Start", json!({})),
            node("ws", "WebSocket", json!({"url": "ws://host.test/feed"})),
            node("emit", "WebSocketEmitter", json!({"eventBody": "ping"})),
            node("end", "End", json!({})),
        ],
        vec![
            edge("e1", "start", "ws"),
            edge("e2", "ws", "emit"),
            edge("e3", "emit", "end"),
        ],
    );

    let mut handle = engine.start_run(data).await.unwrap();
    assert_eq!(handle.wait().await, RunStatus::Completed);

    // Listener and emitter share the WebSocket node's single connection.
    let conns = sockets.conns.lock().clone();
    assert_eq!(conns.len(), 1);
    assert_eq!(
        conns[0].emitted.lock().clone(),
        vec![("message".to_string(), "ping".to_string())]
    );
    // Run completion tears the connection down.
    assert!(conns[0].is_closed());

    let logs = engine.store().get_logs(&handle.run_id).await.unwrap();
    assert!(logs.iter().any(|e| e.message == "Connected"));
}

#[tokio::test]
async fn test_web_socket_listener_receives_event() {
    let sockets = FakeSockets::connecting();
    let engine = WorkflowEngine::builder()
        .web_socket(sockets.clone())
        .build()
        .unwrap();

    let data = workflow_data(
        vec![
            node("start", "Start", json!({})),
            node("ws", "WebSocket", json!({"url": "ws://host.test"})),
            node("listen", "WebSocketListener", json!({"eventName": "message"})),
            node("end", "End", json!({})),
        ],
        vec![
            edge("e1", "start", "ws"),
            edge("e2", "ws", "listen"),
            edge("e3", "listen", "end"),
        ],
    );

    let mut handle = engine.start_run(data).await.unwrap();

    let conns = sockets.wait_for_conns(1).await;
    // The listener may not have subscribed yet; keep pushing until the
    // run settles.
    let conn = conns[0].clone();
    let pusher = tokio::spawn(async move {
        loop {
            conn.push_event("message", Some("{\"price\": 10}"));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    assert_eq!(handle.wait().await, RunStatus::Completed);
    pusher.abort();

    let logs = engine.store().get_logs(&handle.run_id).await.unwrap();
    let received = logs
        .iter()
        .find(|e| e.message == "Received event: message")
        .expect("listener log entry");
    assert_eq!(received.data, Some(json!({"price": 10})));
}

#[tokio::test]
async fn test_socket_io_listener_and_emitter_reuse_connection() {
    let sockets = FakeSockets::connecting();
    let engine = WorkflowEngine::builder()
        .socket_io(sockets.clone())
        .build()
        .unwrap();

    let data = workflow_data(
        vec![
            node("start", "Start", json!({})),
            node("io", "SocketIO", json!({"version": 4, "url": "http://host.test"})),
            node(
                "emit",
                "SocketIOEmitter",
                json!({"eventName": "subscribe", "eventBody": "{\"room\":\"a\"}"}),
            ),
            node("listen", "SocketIOListener", json!({"eventName": "update"})),
            node("end", "End", json!({})),
        ],
        vec![
            edge("e1", "start", "io"),
            edge("e2", "io", "emit"),
            edge("e3", "emit", "listen"),
            edge("e4", "listen", "end"),
        ],
    );

    let mut handle = engine.start_run(data).await.unwrap();

    let conns = sockets.wait_for_conns(1).await;
    // Wait for the emitter to fire before pushing the reply.
    for _ in 0..200 {
        if !conns[0].emitted.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        conns[0].emitted.lock().clone(),
        vec![("subscribe".to_string(), "{\"room\":\"a\"}".to_string())]
    );

    let conn = conns[0].clone();
    let pusher = tokio::spawn(async move {
        loop {
            conn.push_event("update", Some("{\"v\": 1}"));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    assert_eq!(handle.wait().await, RunStatus::Completed);
    pusher.abort();
    assert_eq!(sockets.conns.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_timeout_fails_run() {
    let sockets = FakeSockets::never_connecting();
    let engine = WorkflowEngine::builder()
        .web_socket(sockets.clone())
        .config(EngineConfig {
            connect_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        })
        .build()
        .unwrap();

    let data = workflow_data(
        vec![
            node("start", "Start", json!({})),
            node("ws", "WebSocket", json!({"url": "ws://host.test"})),
            node("end", "End", json!({})),
        ],
        vec![edge("e1", "start", "ws"), edge("e2", "ws", "end")],
    );

    let mut handle = engine.start_run(data).await.unwrap();
    assert_eq!(handle.wait().await, RunStatus::Failed);

    let logs = engine.store().get_logs(&handle.run_id).await.unwrap();
    assert!(logs.iter().any(|e| e.message == "Connection timeout"));
    assert!(!logs.iter().any(|e| e.message == "Ending workflow run"));
}

#[tokio::test]
async fn test_listener_without_upstream_connection_node() {
    let engine = WorkflowEngine::builder().build().unwrap();

    let data = workflow_data(
        vec![
            node("start", "Start", json!({})),
            node("listen", "WebSocketListener", json!({"eventName": "message"})),
            node("end", "End", json!({})),
        ],
        vec![edge("e1", "start", "listen"), edge("e2", "listen", "end")],
    );

    let mut handle = engine.start_run(data).await.unwrap();
    assert_eq!(handle.wait().await, RunStatus::Completed);

    let logs = engine.store().get_logs(&handle.run_id).await.unwrap();
    assert!(logs
        .iter()
        .any(|e| e.message == "No WebSocket node found" && e.debug));
}

#[tokio::test]
async fn test_parallel_entries_get_their_own_connections() {
    let sockets = FakeSockets::connecting();
    let engine = WorkflowEngine::builder()
        .web_socket(sockets.clone())
        .build()
        .unwrap();

    let data = workflow_data(
        vec![
            node(
                "start",
                "Start",
                json!({"parallelEntries": [{"variables": []}, {"variables": []}]}),
            ),
            node("ws", "WebSocket", json!({"url": "ws://host.test"})),
            node("end", "End", json!({})),
        ],
        vec![edge("e1", "start", "ws"), edge("e2", "ws", "end")],
    );

    let mut handle = engine.start_run(data).await.unwrap();
    assert_eq!(handle.wait().await, RunStatus::Completed);

    // One connection per branch; End closes only its own branch's
    // connection, terminal teardown sweeps the rest.
    assert_eq!(sockets.conns.lock().len(), 2);
    assert!(sockets.conns.lock().iter().all(|c| c.is_closed()));
}

#[tokio::test(start_paused = true)]
async fn test_stop_run_closes_open_connections() {
    let sockets = FakeSockets::connecting();
    let engine = WorkflowEngine::builder()
        .web_socket(sockets.clone())
        .build()
        .unwrap();

    let data = workflow_data(
        vec![
            node("start", "Start", json!({})),
            node("ws", "WebSocket", json!({"url": "ws://host.test"})),
            node("listen", "WebSocketListener", json!({"eventName": "never"})),
            node("end", "End", json!({})),
        ],
        vec![
            edge("e1", "start", "ws"),
            edge("e2", "ws", "listen"),
            edge("e3", "listen", "end"),
        ],
    );

    let mut handle = engine.start_run(data).await.unwrap();
    let conns = sockets.wait_for_conns(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    engine.stop_run(&handle.run_id).await.unwrap();
    assert_eq!(handle.wait().await, RunStatus::Cancelled);
    assert!(conns[0].is_closed());
}
