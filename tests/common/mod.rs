//! Shared fixtures: graph builders and scripted network capabilities.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

use flowrun::core::{
    HttpCapability, HttpRequestSpec, HttpResponseData, SocketConnection, SocketEvent,
    SocketIoCapability, WebSocketCapability,
};
use flowrun::{Edge, Environment, Node, NodeError, NodeType, Workflow, WorkflowData};

pub fn node(id: &str, node_type: &str, data: Value) -> Node {
    Node {
        id: id.to_string(),
        node_type: NodeType::from(node_type),
        data,
    }
}

pub fn edge(id: &str, source: &str, target: &str) -> Edge {
    labeled_edge(id, source, "output", target)
}

pub fn labeled_edge(id: &str, source: &str, source_handle: &str, target: &str) -> Edge {
    Edge {
        id: id.to_string(),
        source: source.to_string(),
        source_handle: source_handle.to_string(),
        target: target.to_string(),
        target_handle: "input".to_string(),
    }
}

pub fn workflow_data(nodes: Vec<Node>, edges: Vec<Edge>) -> WorkflowData {
    WorkflowData {
        workflow: Workflow {
            id: "w1".to_string(),
            name: "test workflow".to_string(),
            current_environment_id: None,
        },
        environments: vec![],
        nodes,
        edges,
    }
}

pub fn workflow_data_with_env(
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    env: &[(&str, &str)],
) -> WorkflowData {
    let mut data = workflow_data(nodes, edges);
    data.workflow.current_environment_id = Some("env1".to_string());
    data.environments = vec![Environment {
        id: "env1".to_string(),
        name: "test".to_string(),
        env: env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }];
    data
}

/// HTTP capability that answers every request with the same body and
/// records the request specs it saw.
pub struct RespondingHttp {
    pub body: String,
    pub seen: Mutex<Vec<HttpRequestSpec>>,
}

impl RespondingHttp {
    pub fn json(body: Value) -> Arc<Self> {
        Arc::new(RespondingHttp {
            body: body.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl HttpCapability for RespondingHttp {
    async fn request(
        &self,
        spec: HttpRequestSpec,
        _cancel: CancellationToken,
    ) -> Result<HttpResponseData, NodeError> {
        self.seen.lock().push(spec);
        Ok(HttpResponseData {
            status: 200,
            body: self.body.clone(),
        })
    }
}

/// HTTP capability that always fails with a network error.
pub struct FailingHttp;

#[async_trait]
impl HttpCapability for FailingHttp {
    async fn request(
        &self,
        _spec: HttpRequestSpec,
        _cancel: CancellationToken,
    ) -> Result<HttpResponseData, NodeError> {
        Err(NodeError::HttpError("connection refused".to_string()))
    }
}

/// HTTP capability that answers the first `ok_calls` requests and fails
/// every one after that.
pub struct FlakyHttp {
    ok_calls: usize,
    calls: AtomicUsize,
}

impl FlakyHttp {
    pub fn new(ok_calls: usize) -> Arc<Self> {
        Arc::new(FlakyHttp {
            ok_calls,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl HttpCapability for FlakyHttp {
    async fn request(
        &self,
        _spec: HttpRequestSpec,
        _cancel: CancellationToken,
    ) -> Result<HttpResponseData, NodeError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.ok_calls {
            Ok(HttpResponseData {
                status: 200,
                body: "{}".to_string(),
            })
        } else {
            Err(NodeError::HttpError("connection refused".to_string()))
        }
    }
}

/// HTTP capability that hangs until aborted.
pub struct HangingHttp;

#[async_trait]
impl HttpCapability for HangingHttp {
    async fn request(
        &self,
        _spec: HttpRequestSpec,
        cancel: CancellationToken,
    ) -> Result<HttpResponseData, NodeError> {
        cancel.cancelled().await;
        Err(NodeError::Aborted)
    }
}

/// Scriptable in-memory socket connection.
pub struct FakeConn {
    pub events_tx: broadcast::Sender<SocketEvent>,
    pub emitted: Mutex<Vec<(String, String)>>,
    pub closed: AtomicBool,
    connects: bool,
}

impl FakeConn {
    fn new(connects: bool) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(32);
        Arc::new(FakeConn {
            events_tx,
            emitted: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            connects,
        })
    }

    pub fn push_event(&self, name: &str, data: Option<&str>) {
        let _ = self.events_tx.send(SocketEvent {
            name: name.to_string(),
            data: data.map(str::to_string),
        });
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocketConnection for FakeConn {
    async fn wait_connected(&self, timeout: Duration) -> bool {
        if self.connects {
            true
        } else {
            tokio::time::sleep(timeout).await;
            false
        }
    }

    fn events(&self) -> broadcast::Receiver<SocketEvent> {
        self.events_tx.subscribe()
    }

    async fn emit(&self, event: &str, body: &str) -> Result<(), NodeError> {
        self.emitted.lock().push((event.to_string(), body.to_string()));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Socket capability serving [`FakeConn`]s, one per connect call. Serves
/// both the Socket.IO and WebSocket seams.
pub struct FakeSockets {
    pub conns: Mutex<Vec<Arc<FakeConn>>>,
    connects: bool,
}

impl FakeSockets {
    pub fn connecting() -> Arc<Self> {
        Arc::new(FakeSockets {
            conns: Mutex::new(Vec::new()),
            connects: true,
        })
    }

    pub fn never_connecting() -> Arc<Self> {
        Arc::new(FakeSockets {
            conns: Mutex::new(Vec::new()),
            connects: false,
        })
    }

    fn next_conn(&self) -> Arc<FakeConn> {
        let conn = FakeConn::new(self.connects);
        self.conns.lock().push(conn.clone());
        conn
    }

    /// Wait until at least `count` connections have been opened.
    pub async fn wait_for_conns(&self, count: usize) -> Vec<Arc<FakeConn>> {
        for _ in 0..200 {
            {
                let conns = self.conns.lock();
                if conns.len() >= count {
                    return conns.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} connections");
    }
}

#[async_trait]
impl SocketIoCapability for FakeSockets {
    async fn connect(
        &self,
        _version: u8,
        _url: &Url,
        _path: &str,
    ) -> Result<Arc<dyn SocketConnection>, NodeError> {
        Ok(self.next_conn())
    }
}

#[async_trait]
impl WebSocketCapability for FakeSockets {
    async fn connect(&self, _url: &Url) -> Result<Arc<dyn SocketConnection>, NodeError> {
        Ok(self.next_conn())
    }
}

/// Map of env entries for assertions.
pub fn vars(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
