//! Per-run coordination state.
//!
//! All mutable run state lives here: the status cell, the active-path
//! counter, the stop signal, and the connection registry. Nothing is
//! shared across runs, so concurrent runs of the same workflow never
//! interfere.

use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::capability::{HttpCapability, SocketIoCapability, WebSocketCapability};
use crate::core::connections::ConnectionRegistry;
use crate::core::log_sink::LogSink;
use crate::core::store::RunStore;
use crate::graph::GraphModel;
use crate::model::{Node, RunStatus, WorkflowLogEntry};
use crate::nodes::HandlerRegistry;

/// Engine-wide tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long socket nodes wait for a connection to establish.
    pub connect_timeout: Duration,
    /// Overall timeout applied to HTTP requests.
    pub http_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            connect_timeout: Duration::from_secs(5),
            http_timeout: Duration::from_secs(30),
        }
    }
}

pub struct RunContext {
    pub run_id: String,
    pub workflow_id: String,
    pub graph: Arc<GraphModel>,
    /// Env map of the workflow's selected environment.
    pub environment: HashMap<String, String>,
    pub config: EngineConfig,
    /// Cooperative stop signal. Cancelled on stop and on run failure so
    /// that sibling branches halt at their next checkpoint.
    pub cancel: CancellationToken,
    /// Number of graph paths currently being traversed. The run completes
    /// when this returns to zero while the run is still `Running`.
    pub active_paths: AtomicI64,
    pub connections: ConnectionRegistry,
    pub sink: LogSink,
    pub store: Arc<dyn RunStore>,
    pub http: Arc<dyn HttpCapability>,
    pub socket_io: Arc<dyn SocketIoCapability>,
    pub web_socket: Arc<dyn WebSocketCapability>,
    pub handlers: Arc<HandlerRegistry>,
    status_tx: watch::Sender<RunStatus>,
}

impl RunContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: String,
        workflow_id: String,
        graph: Arc<GraphModel>,
        environment: HashMap<String, String>,
        config: EngineConfig,
        sink: LogSink,
        store: Arc<dyn RunStore>,
        http: Arc<dyn HttpCapability>,
        socket_io: Arc<dyn SocketIoCapability>,
        web_socket: Arc<dyn WebSocketCapability>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        let (status_tx, _) = watch::channel(RunStatus::Running);
        RunContext {
            run_id,
            workflow_id,
            graph,
            environment,
            config,
            cancel: CancellationToken::new(),
            active_paths: AtomicI64::new(0),
            connections: ConnectionRegistry::new(),
            sink,
            store,
            http,
            socket_io,
            web_socket,
            handlers,
            status_tx,
        }
    }

    pub fn status(&self) -> RunStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<RunStatus> {
        self.status_tx.subscribe()
    }

    /// Whether the run has been asked to stop or has already failed.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Append one execution log entry.
    pub async fn log(
        &self,
        branch: u32,
        node: Option<&Node>,
        message: impl Into<String>,
        data: Option<Value>,
        debug: bool,
    ) {
        self.sink
            .append(WorkflowLogEntry {
                timestamp: Utc::now(),
                run_id: self.run_id.clone(),
                branch,
                node_id: node.map(|n| n.id.clone()),
                node_type: node.map(|n| n.node_type.as_str().to_string()),
                message: message.into(),
                data,
                debug,
            })
            .await;
    }

    /// Mark the run completed. No-op if another terminal transition won.
    pub async fn mark_completed(&self) -> bool {
        self.transition(RunStatus::Completed, 0, "Workflow run completed")
            .await
    }

    /// Mark the run failed and signal every other branch to stop.
    pub async fn mark_failed(&self, branch: u32) -> bool {
        let won = self
            .transition(RunStatus::Failed, branch, "Workflow run failed")
            .await;
        if won {
            self.cancel.cancel();
        }
        won
    }

    /// Mark the run cancelled in response to a stop request.
    pub async fn mark_cancelled(&self) -> bool {
        self.transition(RunStatus::Cancelled, 0, "Workflow run cancelled")
            .await
    }

    /// First terminal transition wins; later attempts return `false` and
    /// have no effect. The winner persists the status, writes the terminal
    /// log line, and tears down every connection of the run.
    async fn transition(&self, to: RunStatus, branch: u32, message: &str) -> bool {
        let won = self.status_tx.send_if_modified(|status| {
            if *status == RunStatus::Running {
                *status = to;
                true
            } else {
                false
            }
        });
        if !won {
            return false;
        }

        if let Err(e) = self.store.update_run_status(&self.run_id, to).await {
            tracing::warn!(run_id = %self.run_id, error = %e, "failed to persist run status");
        }
        self.log(branch, None, message, None, false).await;
        self.connections.close_run(&self.run_id).await;
        true
    }
}
