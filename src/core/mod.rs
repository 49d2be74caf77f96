//! Run coordination: state, traversal, connections, logging, persistence.

pub mod capability;
pub mod connections;
pub(crate) mod dispatcher;
pub mod log_sink;
pub mod run_context;
pub mod store;

pub use capability::{
    HttpCapability, HttpPayload, HttpRequestSpec, HttpResponseData, ReqwestHttp, SocketConnection,
    SocketEvent, SocketIoCapability, TungsteniteWebSocket, UnconfiguredSocketIo,
    WebSocketCapability,
};
pub use connections::{ConnectionHandle, ConnectionKey, ConnectionRegistry};
pub use log_sink::{ChannelBroadcaster, LogBroadcaster, LogSink, NoopBroadcaster};
pub use run_context::{EngineConfig, RunContext};
pub use store::{MemoryRunStore, RunStore};
