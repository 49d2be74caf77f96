//! Abstract network capabilities consumed by node handlers.
//!
//! The engine treats protocol clients as pluggable: handlers talk to
//! [`HttpCapability`], [`SocketIoCapability`], and [`WebSocketCapability`]
//! and never to a concrete client. The crate ships a `reqwest`-backed HTTP
//! implementation and a `tokio-tungstenite` WebSocket implementation; a
//! Socket.IO client must be injected by the embedding application.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::NodeError;

/// A fully built HTTP request, ready for the client.
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<HttpPayload>,
}

#[derive(Debug, Clone)]
pub enum HttpPayload {
    /// Raw body text sent as `application/json`.
    Json(String),
    /// Name/value pairs sent as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct HttpResponseData {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait HttpCapability: Send + Sync {
    /// Issue the request. Cancelling `cancel` aborts the request and
    /// resolves to [`NodeError::Aborted`].
    async fn request(
        &self,
        spec: HttpRequestSpec,
        cancel: CancellationToken,
    ) -> Result<HttpResponseData, NodeError>;
}

/// An event observed on a live socket connection. For raw WebSockets the
/// names are `open`, `message`, `close`, and `error`; Socket.IO
/// connections use `connect`, `disconnect`, and author-defined events.
#[derive(Debug, Clone)]
pub struct SocketEvent {
    pub name: String,
    pub data: Option<String>,
}

/// A live socket connection handle, registered in the connection registry
/// immediately after the connect attempt is initiated.
#[async_trait]
pub trait SocketConnection: Send + Sync {
    /// Wait until the connection is established. Returns `false` when the
    /// connection fails or `timeout` elapses first.
    async fn wait_connected(&self, timeout: Duration) -> bool;

    /// Subscribe to the connection's event stream.
    fn events(&self) -> broadcast::Receiver<SocketEvent>;

    async fn emit(&self, event: &str, body: &str) -> Result<(), NodeError>;

    async fn close(&self);
}

#[async_trait]
pub trait SocketIoCapability: Send + Sync {
    /// Initiate a version-specific (v2/v3/v4) connect attempt and return
    /// the handle without waiting for the handshake to finish.
    async fn connect(
        &self,
        version: u8,
        url: &Url,
        path: &str,
    ) -> Result<Arc<dyn SocketConnection>, NodeError>;
}

#[async_trait]
pub trait WebSocketCapability: Send + Sync {
    /// Initiate a connect attempt and return the handle without waiting
    /// for the handshake to finish.
    async fn connect(&self, url: &Url) -> Result<Arc<dyn SocketConnection>, NodeError>;
}

// --- reqwest-backed HTTP ---

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(timeout: Duration) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::HttpError(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpCapability for ReqwestHttp {
    async fn request(
        &self,
        spec: HttpRequestSpec,
        cancel: CancellationToken,
    ) -> Result<HttpResponseData, NodeError> {
        let method = reqwest::Method::from_bytes(spec.method.as_bytes())
            .map_err(|_| NodeError::HttpError(format!("Invalid method: {}", spec.method)))?;

        let mut request = self.client.request(method, spec.url.clone());
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }
        match spec.body {
            Some(HttpPayload::Json(text)) => {
                request = request.body(text);
            }
            Some(HttpPayload::Form(pairs)) => {
                request = request.form(&pairs);
            }
            None => {}
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(NodeError::Aborted),
            result = request.send() => {
                result.map_err(|e| NodeError::HttpError(e.to_string()))?
            }
        };

        let status = response.status().as_u16();
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(NodeError::Aborted),
            text = response.text() => {
                text.map_err(|e| NodeError::HttpError(e.to_string()))?
            }
        };

        Ok(HttpResponseData { status, body })
    }
}

// --- tokio-tungstenite-backed WebSocket ---

pub struct TungsteniteWebSocket;

#[async_trait]
impl WebSocketCapability for TungsteniteWebSocket {
    async fn connect(&self, url: &Url) -> Result<Arc<dyn SocketConnection>, NodeError> {
        Ok(Arc::new(WsConnection::spawn(url.clone())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ConnState {
    Pending,
    Open,
    Closed,
}

/// Connection handle backed by a background task that performs the
/// handshake and pumps frames into the event channel.
pub struct WsConnection {
    events_tx: broadcast::Sender<SocketEvent>,
    outgoing_tx: mpsc::UnboundedSender<String>,
    state_rx: watch::Receiver<ConnState>,
    shutdown: CancellationToken,
}

impl WsConnection {
    fn spawn(url: Url) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnState::Pending);
        let shutdown = CancellationToken::new();

        tokio::spawn(pump_web_socket(
            url,
            events_tx.clone(),
            outgoing_rx,
            state_tx,
            shutdown.clone(),
        ));

        WsConnection {
            events_tx,
            outgoing_tx,
            state_rx,
            shutdown,
        }
    }
}

#[async_trait]
impl SocketConnection for WsConnection {
    async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        let wait = async {
            loop {
                match *rx.borrow() {
                    ConnState::Open => return true,
                    ConnState::Closed => return false,
                    ConnState::Pending => {}
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    fn events(&self) -> broadcast::Receiver<SocketEvent> {
        self.events_tx.subscribe()
    }

    async fn emit(&self, _event: &str, body: &str) -> Result<(), NodeError> {
        self.outgoing_tx
            .send(body.to_string())
            .map_err(|_| NodeError::EmitError("Connection is closed".to_string()))
    }

    async fn close(&self) {
        self.shutdown.cancel();
    }
}

async fn pump_web_socket(
    url: Url,
    events_tx: broadcast::Sender<SocketEvent>,
    mut outgoing_rx: mpsc::UnboundedReceiver<String>,
    state_tx: watch::Sender<ConnState>,
    shutdown: CancellationToken,
) {
    let emit = |name: &str, data: Option<String>| {
        let _ = events_tx.send(SocketEvent {
            name: name.to_string(),
            data,
        });
    };

    let stream = tokio::select! {
        _ = shutdown.cancelled() => {
            let _ = state_tx.send(ConnState::Closed);
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                emit("error", Some(e.to_string()));
                emit("close", None);
                let _ = state_tx.send(ConnState::Closed);
                return;
            }
        }
    };

    let _ = state_tx.send(ConnState::Open);
    emit("open", None);

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            outgoing = outgoing_rx.recv() => {
                let Some(text) = outgoing else { break };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    emit("error", Some(e.to_string()));
                    break;
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        emit("message", Some(text.to_string()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        emit("message", Some(String::from_utf8_lossy(&bytes).into_owned()));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        emit("error", Some(e.to_string()));
                        break;
                    }
                }
            }
        }
    }

    emit("close", None);
    let _ = state_tx.send(ConnState::Closed);
}

/// Placeholder capability used when no Socket.IO client is configured.
/// Connect attempts fail, which the SocketIO node reports as a failed
/// connection.
pub struct UnconfiguredSocketIo;

#[async_trait]
impl SocketIoCapability for UnconfiguredSocketIo {
    async fn connect(
        &self,
        _version: u8,
        _url: &Url,
        _path: &str,
    ) -> Result<Arc<dyn SocketConnection>, NodeError> {
        Err(NodeError::ConnectionError(
            "No Socket.IO client configured".to_string(),
        ))
    }
}
