//! Node handler trait and registry.
//!
//! A handler receives the node with its data already template-resolved,
//! performs the node's effect, and tells the dispatcher how traversal
//! continues. Handlers log their own domain errors; an `Err` return is
//! reserved for unexpected failures and fails the run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::connections::ConnectionKey;
use crate::core::run_context::RunContext;
use crate::error::{NodeError, NodeResult};
use crate::model::{Node, NodeOutput, NodeType, Param, ParallelEntry};

/// Everything a handler sees for one node visit.
pub struct NodeContext {
    pub run: Arc<RunContext>,
    pub branch: u32,
    /// The visited node, with `{{ }}` tokens already resolved.
    pub node: Node,
    /// The previous node's recorded output, if it recorded one.
    pub previous: Option<NodeOutput>,
}

impl NodeContext {
    /// Log an entry attributed to this visit's node and branch.
    pub async fn log(&self, message: impl Into<String>, data: Option<Value>, debug: bool) {
        self.run
            .log(self.branch, Some(&self.node), message, data, debug)
            .await;
    }

    /// Connection registry key for this visit.
    pub fn connection_key(&self) -> ConnectionKey {
        ConnectionKey::new(self.run.run_id.clone(), self.branch, self.node.id.clone())
    }

    /// Deserialize the resolved node data into the node's config type.
    pub fn config<T: DeserializeOwned>(&self) -> NodeResult<T> {
        serde_json::from_value(self.node.data.clone())
            .map_err(|e| NodeError::ConfigError(e.to_string()))
    }
}

/// What the dispatcher should write into the branch's output map.
pub enum OutputRecord {
    /// Record nothing for this node.
    Skip,
    /// Record `{ input: previous.output, output: value }`.
    Output(Option<Value>),
    /// Record a copy of the previous node's whole record.
    CloneOfPrevious,
}

/// How traversal continues after this node.
pub enum Decision {
    /// Follow all outgoing edges.
    Continue,
    /// Follow only the edge whose source handle matches the label.
    Branch(String),
    /// Start one parallel branch per entry, each following all outgoing
    /// edges with its own variable set.
    Parallel(Vec<ParallelEntry>),
    /// Stop this path without affecting the rest of the run.
    EndBranch,
    /// Fail the whole run.
    FailRun,
}

pub struct Handled {
    pub record: OutputRecord,
    pub decision: Decision,
    /// Variables to append to the branch's variable list.
    pub append_variables: Vec<Param>,
}

impl Handled {
    pub fn next() -> Self {
        Handled {
            record: OutputRecord::Skip,
            decision: Decision::Continue,
            append_variables: Vec::new(),
        }
    }

    pub fn output(value: Option<Value>) -> Self {
        Handled {
            record: OutputRecord::Output(value),
            ..Handled::next()
        }
    }

    pub fn decide(mut self, decision: Decision) -> Self {
        self.decision = decision;
        self
    }
}

#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled>;
}

/// Handler for node types the engine does not know. Logs and lets
/// traversal continue so one exotic node does not sink a whole run.
struct UnknownNodeHandler;

#[async_trait]
impl NodeHandler for UnknownNodeHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        ctx.log(
            format!("Unknown node type: {}", ctx.node.node_type),
            None,
            true,
        )
        .await;
        Ok(Handled::next())
    }
}

/// Maps node types to their handlers.
pub struct HandlerRegistry {
    handlers: HashMap<NodeType, Box<dyn NodeHandler>>,
    fallback: Box<dyn NodeHandler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Registry with every built-in node type registered.
    pub fn new() -> Self {
        use crate::nodes::{control_flow, delay, http, set_variable, socket_io, web_socket};

        let mut registry = HandlerRegistry {
            handlers: HashMap::new(),
            fallback: Box::new(UnknownNodeHandler),
        };
        registry.register(NodeType::Start, control_flow::StartHandler);
        registry.register(NodeType::End, control_flow::EndHandler);
        registry.register(NodeType::IfCondition, control_flow::IfConditionHandler);
        registry.register(NodeType::HttpRequest, http::HttpRequestHandler);
        registry.register(NodeType::SocketIo, socket_io::SocketIoHandler);
        registry.register(NodeType::SocketIoListener, socket_io::SocketIoListenerHandler);
        registry.register(NodeType::SocketIoEmitter, socket_io::SocketIoEmitterHandler);
        registry.register(NodeType::WebSocket, web_socket::WebSocketHandler);
        registry.register(NodeType::WebSocketListener, web_socket::WebSocketListenerHandler);
        registry.register(NodeType::WebSocketEmitter, web_socket::WebSocketEmitterHandler);
        registry.register(NodeType::Delay, delay::DelayHandler);
        registry.register(NodeType::SetVariable, set_variable::SetVariableHandler);
        registry
    }

    pub fn register<H: NodeHandler + 'static>(&mut self, node_type: NodeType, handler: H) {
        self.handlers.insert(node_type, Box::new(handler));
    }

    pub fn get(&self, node_type: &NodeType) -> &dyn NodeHandler {
        self.handlers
            .get(node_type)
            .map(|handler| handler.as_ref())
            .unwrap_or_else(|| self.fallback.as_ref())
    }
}
