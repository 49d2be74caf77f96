//! Socket.IO connection, listener, and emitter handlers.
//!
//! Listener and emitter nodes do not hold a connection themselves; they
//! locate the SocketIO node upstream in the graph and use the connection
//! it registered for the same run and branch.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::core::capability::SocketConnection;
use crate::core::connections::ConnectionKey;
use crate::core::run_context::RunContext;
use crate::error::NodeResult;
use crate::model::{EmitterData, ListenerData, Node, NodeType, SocketIoData};
use crate::nodes::executor::{Decision, Handled, NodeContext, NodeHandler};

/// Parse an event payload: JSON when it is JSON, the raw string otherwise.
pub(crate) fn parse_event_payload(data: Option<&str>) -> Value {
    match data {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        None => Value::Null,
    }
}

/// Spawn a task that logs connection events for as long as the connection
/// or the run lives. `describe` turns an event into a log line, or `None`
/// to skip it.
pub(crate) fn spawn_event_logger<F>(
    run: Arc<RunContext>,
    branch: u32,
    node: Node,
    conn: &Arc<dyn SocketConnection>,
    describe: F,
) where
    F: Fn(&str, Option<&str>) -> Option<(String, Option<Value>, bool)> + Send + 'static,
{
    let mut events = conn.events();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = run.cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            };
            if let Some((message, data, debug)) = describe(&event.name, event.data.as_deref()) {
                run.log(branch, Some(&node), message, data, debug).await;
            }
        }
    });
}

/// Find the connection registered by the nearest upstream node of
/// `wanted` type. Returns the log message to emit when nothing is found.
pub(crate) fn upstream_socket(
    ctx: &NodeContext,
    wanted: &NodeType,
    missing_node_message: &str,
) -> Result<(String, Arc<dyn SocketConnection>), (String, bool)> {
    let Some(owner_id) = ctx.run.graph.upstream_connection(&ctx.node.id, wanted) else {
        return Err((missing_node_message.to_string(), true));
    };
    let key = ConnectionKey::new(ctx.run.run_id.clone(), ctx.branch, owner_id.clone());
    match ctx.run.connections.socket(&key) {
        Some(conn) => Ok((owner_id, conn)),
        None => Err((format!("No connection found for node {owner_id}"), true)),
    }
}

/// Opens a Socket.IO connection and registers it for this run and branch.
/// The node's output is whether the connection was established before the
/// configured timeout; a missed timeout fails the run.
pub struct SocketIoHandler;

#[async_trait]
impl NodeHandler for SocketIoHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        let data: SocketIoData = ctx.config()?;

        let Ok(url) = Url::parse(&data.url) else {
            ctx.log("Invalid URL", Some(Value::String(data.url.clone())), false)
                .await;
            return Ok(Handled::next().decide(Decision::EndBranch));
        };

        let conn = match ctx
            .run
            .socket_io
            .connect(data.version, &url, &data.path)
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                ctx.log(
                    "Failed to create Socket.IO connection",
                    Some(Value::String(e.to_string())),
                    false,
                )
                .await;
                return Ok(Handled::output(Some(Value::Bool(false))).decide(Decision::FailRun));
            }
        };

        // Registered before the handshake completes so run teardown can
        // reach a connection that is still connecting.
        let key = ctx.connection_key();
        ctx.run.connections.register_socket_io(key.clone(), conn.clone());

        spawn_event_logger(
            ctx.run.clone(),
            ctx.branch,
            ctx.node.clone(),
            &conn,
            |name, data| match name {
                "connect" => None,
                "disconnect" => Some(("Disconnected".to_string(), None, false)),
                other => Some((
                    "Received event".to_string(),
                    Some(Value::String(format!(
                        "[{}] {}",
                        other,
                        data.unwrap_or_default()
                    ))),
                    true,
                )),
            },
        );

        if conn.wait_connected(ctx.run.config.connect_timeout).await {
            ctx.log("Connected", None, false).await;
            Ok(Handled::output(Some(Value::Bool(true))))
        } else {
            ctx.log("Connection timeout", None, false).await;
            conn.close().await;
            ctx.run.connections.deregister(&key);
            Ok(Handled::output(Some(Value::Bool(false))).decide(Decision::FailRun))
        }
    }
}

/// Blocks its path until the upstream connection receives a matching
/// event, then records the event payload as output.
pub struct SocketIoListenerHandler;

#[async_trait]
impl NodeHandler for SocketIoListenerHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        let data: ListenerData = ctx.config()?;

        let conn = match upstream_socket(ctx, &NodeType::SocketIo, "No Socket.IO node found") {
            Ok((_owner, conn)) => conn,
            Err((message, debug)) => {
                ctx.log(message, None, debug).await;
                return Ok(Handled::output(None));
            }
        };

        let mut events = conn.events();
        loop {
            let event = tokio::select! {
                _ = ctx.run.cancel.cancelled() => {
                    return Ok(Handled::next().decide(Decision::EndBranch));
                }
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        return Ok(Handled::output(None));
                    }
                },
            };
            if event.name == data.event_name {
                let payload = parse_event_payload(event.data.as_deref());
                ctx.log(
                    format!("Received event: {}", event.name),
                    Some(payload.clone()),
                    false,
                )
                .await;
                return Ok(Handled::output(Some(payload)));
            }
        }
    }
}

/// Emits one event on the upstream connection.
pub struct SocketIoEmitterHandler;

#[async_trait]
impl NodeHandler for SocketIoEmitterHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        let data: EmitterData = ctx.config()?;

        let conn = match upstream_socket(ctx, &NodeType::SocketIo, "No Socket.IO node found") {
            Ok((_owner, conn)) => conn,
            Err((message, debug)) => {
                ctx.log(message, None, debug).await;
                return Ok(Handled::next());
            }
        };

        if let Err(e) = conn.emit(&data.event_name, &data.event_body).await {
            ctx.log("Error", Some(Value::String(e.to_string())), true)
                .await;
        } else {
            ctx.log(format!("Emitted event: {}", data.event_name), None, true)
                .await;
        }
        Ok(Handled::next())
    }
}
