//! WebSocket connection, listener, and emitter handlers.
//!
//! Mirrors the Socket.IO node family: the WebSocket node owns the
//! connection, listeners and emitters find it through the graph. Raw
//! WebSocket events use the fixed names `open`, `message`, `close`, and
//! `error`.

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::error::NodeResult;
use crate::model::{EmitterData, ListenerData, NodeType, WebSocketData};
use crate::nodes::executor::{Decision, Handled, NodeContext, NodeHandler};
use crate::nodes::socket_io::{parse_event_payload, spawn_event_logger, upstream_socket};

pub struct WebSocketHandler;

#[async_trait]
impl NodeHandler for WebSocketHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        let data: WebSocketData = ctx.config()?;

        let Ok(url) = Url::parse(&data.url) else {
            ctx.log("Invalid URL", Some(Value::String(data.url.clone())), false)
                .await;
            return Ok(Handled::next().decide(Decision::EndBranch));
        };

        let conn = match ctx.run.web_socket.connect(&url).await {
            Ok(conn) => conn,
            Err(e) => {
                ctx.log(
                    "Failed to create WebSocket connection",
                    Some(Value::String(e.to_string())),
                    false,
                )
                .await;
                return Ok(Handled::output(Some(Value::Bool(false))).decide(Decision::FailRun));
            }
        };

        let key = ctx.connection_key();
        ctx.run.connections.register_web_socket(key.clone(), conn.clone());

        spawn_event_logger(
            ctx.run.clone(),
            ctx.branch,
            ctx.node.clone(),
            &conn,
            |name, data| match name {
                "open" => None,
                "message" => Some((
                    "Received message".to_string(),
                    Some(Value::String(data.unwrap_or_default().to_string())),
                    true,
                )),
                "close" => Some(("Disconnected".to_string(), None, false)),
                "error" => Some((
                    "Error".to_string(),
                    Some(Value::String(data.unwrap_or_default().to_string())),
                    true,
                )),
                _ => None,
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

/// Waits for one event of the configured name (`message`, `close`,
/// `error`, or `open`) on the upstream connection.
pub struct WebSocketListenerHandler;

#[async_trait]
impl NodeHandler for WebSocketListenerHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        let data: ListenerData = ctx.config()?;

        let conn = match upstream_socket(ctx, &NodeType::WebSocket, "No WebSocket node found") {
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

/// Sends one text message on the upstream connection.
pub struct WebSocketEmitterHandler;

#[async_trait]
impl NodeHandler for WebSocketEmitterHandler {
    async fn handle(&self, ctx: &NodeContext) -> NodeResult<Handled> {
        let data: EmitterData = ctx.config()?;

        let conn = match upstream_socket(ctx, &NodeType::WebSocket, "No WebSocket node found") {
            Ok((_owner, conn)) => conn,
            Err((message, debug)) => {
                ctx.log(message, None, debug).await;
                return Ok(Handled::next());
            }
        };

        if let Err(e) = conn.emit("message", &data.event_body).await {
            ctx.log("Error", Some(Value::String(e.to_string())), true)
                .await;
        } else {
            ctx.log("Sent message", None, true).await;
        }
        Ok(Handled::next())
    }
}
