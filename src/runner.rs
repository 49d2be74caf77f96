//! Public engine surface: starting, stopping, and observing runs.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::capability::{
    HttpCapability, ReqwestHttp, SocketIoCapability, TungsteniteWebSocket, UnconfiguredSocketIo,
    WebSocketCapability,
};
use crate::core::dispatcher;
use crate::core::log_sink::{LogBroadcaster, LogSink, NoopBroadcaster};
use crate::core::run_context::{EngineConfig, RunContext};
use crate::core::store::{MemoryRunStore, RunStore};
use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::GraphModel;
use crate::model::{RunStatus, WorkflowData, WorkflowRun};
use crate::nodes::HandlerRegistry;

pub struct WorkflowEngineBuilder {
    store: Arc<dyn RunStore>,
    broadcaster: Arc<dyn LogBroadcaster>,
    http: Option<Arc<dyn HttpCapability>>,
    socket_io: Arc<dyn SocketIoCapability>,
    web_socket: Arc<dyn WebSocketCapability>,
    config: EngineConfig,
}

impl Default for WorkflowEngineBuilder {
    fn default() -> Self {
        WorkflowEngineBuilder {
            store: Arc::new(MemoryRunStore::new()),
            broadcaster: Arc::new(NoopBroadcaster),
            http: None,
            socket_io: Arc::new(UnconfiguredSocketIo),
            web_socket: Arc::new(TungsteniteWebSocket),
            config: EngineConfig::default(),
        }
    }
}

impl WorkflowEngineBuilder {
    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = store;
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<dyn LogBroadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn http(mut self, http: Arc<dyn HttpCapability>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn socket_io(mut self, socket_io: Arc<dyn SocketIoCapability>) -> Self {
        self.socket_io = socket_io;
        self
    }

    pub fn web_socket(mut self, web_socket: Arc<dyn WebSocketCapability>) -> Self {
        self.web_socket = web_socket;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> WorkflowResult<WorkflowEngine> {
        let http = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestHttp::new(self.config.http_timeout)?),
        };
        Ok(WorkflowEngine {
            store: self.store,
            broadcaster: self.broadcaster,
            http,
            socket_io: self.socket_io,
            web_socket: self.web_socket,
            config: self.config,
            handlers: Arc::new(HandlerRegistry::new()),
            active: Arc::new(DashMap::new()),
        })
    }
}

/// Executes workflow definitions. One engine serves many concurrent runs;
/// each run gets its own isolated [`RunContext`].
pub struct WorkflowEngine {
    store: Arc<dyn RunStore>,
    broadcaster: Arc<dyn LogBroadcaster>,
    http: Arc<dyn HttpCapability>,
    socket_io: Arc<dyn SocketIoCapability>,
    web_socket: Arc<dyn WebSocketCapability>,
    config: EngineConfig,
    handlers: Arc<HandlerRegistry>,
    active: Arc<DashMap<String, Arc<RunContext>>>,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::default()
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Validate the graph, persist a `Running` run record, and launch
    /// traversal in the background. The returned handle observes the run's
    /// status; the run itself outlives the handle.
    pub async fn start_run(&self, data: WorkflowData) -> WorkflowResult<RunHandle> {
        let graph = Arc::new(GraphModel::new(data.nodes.clone(), data.edges.clone())?);
        let environment = data.current_environment();

        let run_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let run = WorkflowRun {
            id: run_id.clone(),
            workflow_id: data.workflow.id.clone(),
            environment_id: data.workflow.current_environment_id.clone(),
            status: RunStatus::Running,
            created_at: now,
            updated_at: now,
        };
        self.store.create_run(&run).await?;

        let sink = LogSink::new(self.store.clone(), self.broadcaster.clone());
        let ctx = Arc::new(RunContext::new(
            run_id.clone(),
            data.workflow.id.clone(),
            graph.clone(),
            environment,
            self.config.clone(),
            sink,
            self.store.clone(),
            self.http.clone(),
            self.socket_io.clone(),
            self.web_socket.clone(),
            self.handlers.clone(),
        ));
        let handle = RunHandle {
            run_id: run_id.clone(),
            status: ctx.subscribe_status(),
        };

        let Some(start) = graph.start_node() else {
            ctx.log(0, None, "No start node found, ending workflow run", None, false)
                .await;
            ctx.mark_failed(0).await;
            return Ok(handle);
        };
        let start_id = start.id.clone();

        self.active.insert(run_id, ctx.clone());
        let active = self.active.clone();
        tokio::spawn(async move {
            dispatcher::visit_node(
                ctx.clone(),
                0,
                start_id,
                None,
                dispatcher::new_outputs(),
                Vec::new(),
            )
            .await;

            // A Start node with no outgoing edges never touches the
            // active-path counter; complete the run here.
            if ctx.active_paths.load(Ordering::SeqCst) == 0
                && !ctx.is_stopped()
                && ctx.status() == RunStatus::Running
            {
                ctx.mark_completed().await;
            }
            active.remove(&ctx.run_id);
        });

        Ok(handle)
    }

    /// Request cooperative cancellation of a live run. Nodes stop at their
    /// next checkpoint; connections are torn down immediately.
    pub async fn stop_run(&self, run_id: &str) -> WorkflowResult<()> {
        let ctx = self
            .active
            .get(run_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))?;

        ctx.cancel.cancel();
        ctx.mark_cancelled().await;
        Ok(())
    }
}

/// Observer for one run's status.
pub struct RunHandle {
    pub run_id: String,
    status: watch::Receiver<RunStatus>,
}

impl RunHandle {
    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Wait until the run reaches a terminal status.
    pub async fn wait(&mut self) -> RunStatus {
        loop {
            let status = *self.status.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if self.status.changed().await.is_err() {
                return *self.status.borrow();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Workflow, WorkflowData};

    fn workflow_data(nodes: Vec<crate::model::Node>, edges: Vec<crate::model::Edge>) -> WorkflowData {
        WorkflowData {
            workflow: Workflow {
                id: "w1".to_string(),
                name: "test".to_string(),
                current_environment_id: None,
            },
            environments: vec![],
            nodes,
            edges,
        }
    }

    #[tokio::test]
    async fn test_missing_start_node_fails_run() {
        let engine = WorkflowEngine::builder().build().unwrap();
        let mut handle = engine.start_run(workflow_data(vec![], vec![])).await.unwrap();

        assert_eq!(handle.wait().await, RunStatus::Failed);

        let logs = engine.store().get_logs(&handle.run_id).await.unwrap();
        assert!(logs
            .iter()
            .any(|e| e.message == "No start node found, ending workflow run"));
        assert!(logs.iter().any(|e| e.message == "Workflow run failed"));

        let runs = engine.store().list_runs("w1").await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_stop_unknown_run_is_an_error() {
        let engine = WorkflowEngine::builder().build().unwrap();
        let err = engine.stop_run("nope").await.unwrap_err();
        assert!(matches!(err, WorkflowError::RunNotFound(_)));
    }
}
