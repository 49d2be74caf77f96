//! A workflow execution engine for node-graph automations.
//!
//! A workflow is a directed graph of typed nodes (HTTP requests, socket
//! connections, conditions, delays, variables) joined by labeled edges.
//! The engine walks the graph from its Start node, fanning out in
//! parallel at every multi-edge node, resolving `{{ expr }}` templates in
//! node data against the run's context, and streaming structured logs as
//! it goes. Runs are isolated, cooperatively cancellable, and settle in
//! exactly one terminal status.
//!
//! ```no_run
//! use flowrun::{WorkflowEngine, WorkflowData};
//!
//! # async fn demo(data: WorkflowData) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = WorkflowEngine::builder().build()?;
//! let mut handle = engine.start_run(data).await?;
//! let status = handle.wait().await;
//! println!("run {} finished: {:?}", handle.run_id, status);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod graph;
pub mod model;
pub mod nodes;
pub mod runner;
pub mod template;

pub use crate::core::{
    ChannelBroadcaster, EngineConfig, HttpCapability, LogBroadcaster, MemoryRunStore,
    NoopBroadcaster, RunStore, SocketConnection, SocketEvent, SocketIoCapability,
    WebSocketCapability,
};
pub use crate::error::{NodeError, WorkflowError, WorkflowResult};
pub use crate::model::{
    Edge, Environment, Node, NodeType, Param, RunStatus, Workflow, WorkflowData, WorkflowLogEntry,
    WorkflowRun,
};
pub use crate::runner::{RunHandle, WorkflowEngine, WorkflowEngineBuilder};
