//! Wire-level data model: workflows, nodes, edges, runs, and log entries.
//!
//! Node `data` payloads stay as raw [`serde_json::Value`] on the graph; the
//! typed per-node config structs in this module are deserialized from the
//! payload after template resolution, at handler entry.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Node type discriminator. Unrecognized wire names are preserved so the
/// engine can treat them as a lenient no-op instead of failing the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeType {
    Start,
    End,
    HttpRequest,
    SocketIo,
    SocketIoListener,
    SocketIoEmitter,
    WebSocket,
    WebSocketListener,
    WebSocketEmitter,
    IfCondition,
    Delay,
    SetVariable,
    Unknown(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Start => "Start",
            NodeType::End => "End",
            NodeType::HttpRequest => "HTTPRequest",
            NodeType::SocketIo => "SocketIO",
            NodeType::SocketIoListener => "SocketIOListener",
            NodeType::SocketIoEmitter => "SocketIOEmitter",
            NodeType::WebSocket => "WebSocket",
            NodeType::WebSocketListener => "WebSocketListener",
            NodeType::WebSocketEmitter => "WebSocketEmitter",
            NodeType::IfCondition => "IfCondition",
            NodeType::Delay => "Delay",
            NodeType::SetVariable => "SetVariable",
            NodeType::Unknown(name) => name,
        }
    }
}

impl From<&str> for NodeType {
    fn from(s: &str) -> Self {
        match s {
            "Start" => NodeType::Start,
            "End" => NodeType::End,
            "HTTPRequest" => NodeType::HttpRequest,
            "SocketIO" => NodeType::SocketIo,
            "SocketIOListener" => NodeType::SocketIoListener,
            "SocketIOEmitter" => NodeType::SocketIoEmitter,
            "WebSocket" => NodeType::WebSocket,
            "WebSocketListener" => NodeType::WebSocketListener,
            "WebSocketEmitter" => NodeType::WebSocketEmitter,
            "IfCondition" => NodeType::IfCondition,
            "Delay" => NodeType::Delay,
            "SetVariable" => NodeType::SetVariable,
            other => NodeType::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NodeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NodeType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(NodeType::from(s.as_str()))
    }
}

/// A workflow graph node as authored in the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Author-supplied payload; may contain `{{ }}` template tokens.
    pub data: Value,
}

/// A directed edge between two nodes. `source_handle` selects among
/// multiple outgoing edges of the same source (`"output"`, `"true"`,
/// `"false"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub source_handle: String,
    pub target: String,
    pub target_handle: String,
}

/// A named value with an enabled flag, used for variables, query params,
/// headers, and form bodies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub disabled: bool,
}

/// Flatten the non-disabled params into a name → value map.
pub fn active_params(params: &[Param]) -> HashMap<String, String> {
    params
        .iter()
        .filter(|p| !p.disabled)
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect()
}

/// Workflow record, as far as the engine cares about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub current_environment_id: Option<String>,
}

/// A named environment: a flat string → string map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    pub env: HashMap<String, String>,
}

/// Everything needed to execute one workflow: the definition plus its
/// environments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowData {
    pub workflow: Workflow,
    #[serde(default)]
    pub environments: Vec<Environment>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl WorkflowData {
    /// The env map of the workflow's currently selected environment, or an
    /// empty map when none is selected.
    pub fn current_environment(&self) -> HashMap<String, String> {
        self.workflow
            .current_environment_id
            .as_deref()
            .and_then(|id| self.environments.iter().find(|e| e.id == id))
            .map(|e| e.env.clone())
            .unwrap_or_default()
    }
}

/// Run lifecycle states. `Running` is the only non-terminal state; once a
/// run leaves it, it never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// One execution instance of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub environment_id: Option<String>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A structured, append-only execution log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowLogEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    /// Branch index; 0 for the default branch, 1..N for parallel entries.
    pub branch: u32,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    pub debug: bool,
}

/// Per-node execution record kept in a branch's output map.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    pub input: Option<Value>,
    pub output: Option<Value>,
}

// --- Typed node config payloads ---

/// One parallel entry of a Start node; each entry begins its own branch
/// with its own variable set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParallelEntry {
    #[serde(default)]
    pub variables: Vec<Param>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartData {
    #[serde(default)]
    pub parallel_entries: Vec<ParallelEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpBody {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestData {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub query_params: Vec<Param>,
    #[serde(default)]
    pub headers: Vec<Param>,
    #[serde(default)]
    pub body: HttpBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocketIoData {
    pub version: u8,
    pub url: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerData {
    pub event_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitterData {
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub event_body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketData {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfConditionData {
    pub left_operand: String,
    pub operator: String,
    pub right_operand: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelayData {
    #[serde(rename = "delayInMS")]
    pub delay_in_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetVariableData {
    #[serde(default)]
    pub variables: Vec<Param>,
}
