//! Registry of live connections, keyed by (run, branch, node).
//!
//! Connections are registered as soon as a connect attempt is initiated so
//! that run teardown can reach attempts that are still handshaking.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::core::capability::SocketConnection;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub run_id: String,
    pub branch: u32,
    pub node_id: String,
}

impl ConnectionKey {
    pub fn new(run_id: impl Into<String>, branch: u32, node_id: impl Into<String>) -> Self {
        ConnectionKey {
            run_id: run_id.into(),
            branch,
            node_id: node_id.into(),
        }
    }
}

#[derive(Clone)]
pub enum ConnectionHandle {
    /// Abort token for an in-flight HTTP request.
    Http(CancellationToken),
    SocketIo(Arc<dyn SocketConnection>),
    WebSocket(Arc<dyn SocketConnection>),
}

#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<ConnectionKey, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight HTTP request and return its abort token.
    pub fn register_http(&self, key: ConnectionKey) -> CancellationToken {
        let token = CancellationToken::new();
        self.entries.insert(key, ConnectionHandle::Http(token.clone()));
        token
    }

    pub fn register_socket_io(&self, key: ConnectionKey, conn: Arc<dyn SocketConnection>) {
        self.entries.insert(key, ConnectionHandle::SocketIo(conn));
    }

    pub fn register_web_socket(&self, key: ConnectionKey, conn: Arc<dyn SocketConnection>) {
        self.entries.insert(key, ConnectionHandle::WebSocket(conn));
    }

    pub fn deregister(&self, key: &ConnectionKey) {
        self.entries.remove(key);
    }

    /// Look up the socket connection registered under `key`, if any.
    pub fn socket(&self, key: &ConnectionKey) -> Option<Arc<dyn SocketConnection>> {
        match self.entries.get(key).map(|e| e.value().clone()) {
            Some(ConnectionHandle::SocketIo(conn)) | Some(ConnectionHandle::WebSocket(conn)) => {
                Some(conn)
            }
            _ => None,
        }
    }

    /// Close and remove every connection of one branch of a run.
    pub async fn close_branch(&self, run_id: &str, branch: u32) {
        self.close_matching(|key| key.run_id == run_id && key.branch == branch)
            .await;
    }

    /// Close and remove every connection of a run, across all branches.
    pub async fn close_run(&self, run_id: &str) {
        self.close_matching(|key| key.run_id == run_id).await;
    }

    async fn close_matching(&self, matches: impl Fn(&ConnectionKey) -> bool) {
        let keys: Vec<ConnectionKey> = self
            .entries
            .iter()
            .filter(|entry| matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        for key in keys {
            if let Some((_, handle)) = self.entries.remove(&key) {
                match handle {
                    ConnectionHandle::Http(token) => token.cancel(),
                    ConnectionHandle::SocketIo(conn) | ConnectionHandle::WebSocket(conn) => {
                        conn.close().await;
                    }
                }
            }
        }
    }
}
