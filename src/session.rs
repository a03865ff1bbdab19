//! Control channel sessions.
//!
//! A [`Session`] owns one websocket: it reads messages, dispatches them and
//! writes the responses. Sessions share nothing with each other; the only
//! shared structure is the [`SessionSet`] the server uses to track them.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::ws_methods::{dispatch, Request, Responder, Response, SendError};
use crate::handlers::HandlerContext;

/// A live session as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub connected_at: SystemTime,
}

/// The set of live sessions.
///
/// Insertion hands back a [`SessionGuard`]; dropping the guard removes the
/// entry. [`SessionSet::clear`] may run concurrently with both, and a guard
/// whose entry was already cleared drops silently.
#[derive(Clone, Default)]
pub struct SessionSet {
    inner: Arc<RwLock<HashMap<Uuid, SessionInfo>>>,
}

impl SessionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for `peer`.
    pub fn insert(&self, peer: SocketAddr) -> SessionGuard {
        let info = SessionInfo {
            id: Uuid::new_v4(),
            peer,
            connected_at: SystemTime::now(),
        };
        let id = info.id;
        self.inner.write().insert(id, info);
        tracing::debug!(%id, %peer, "session registered");
        SessionGuard {
            id,
            sessions: self.clone(),
        }
    }

    /// Remove a session. Returns `None` if it was not present.
    pub fn remove(&self, id: &Uuid) -> Option<SessionInfo> {
        self.inner.write().remove(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionInfo> {
        self.inner.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.inner.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Forget every session. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.write();
        let count = inner.len();
        inner.clear();
        count
    }
}

/// Removes its session from the [`SessionSet`] when dropped.
pub struct SessionGuard {
    id: Uuid,
    sessions: SessionSet,
}

impl SessionGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        match self.sessions.remove(&self.id) {
            Some(info) => tracing::info!(id = %self.id, peer = %info.peer, "session removed"),
            None => tracing::debug!(id = %self.id, "session already cleared"),
        }
    }
}

/// Why a session's read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the channel or the transport dropped.
    Closed,
    /// The server is stopping.
    Shutdown,
}

/// Websocket write half as a [`Responder`].
pub struct WsResponder {
    tx: SplitSink<WebSocket, Message>,
}

impl Responder for WsResponder {
    async fn send(&mut self, response: Response) -> Result<(), SendError> {
        let text = serde_json::to_string(&response)?;
        self.tx
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| SendError::Closed)
    }
}

/// One client's request/response lifecycle.
pub struct Session {
    guard: SessionGuard,
    peer: SocketAddr,
    ctx: Arc<HandlerContext>,
}

impl Session {
    pub fn new(guard: SessionGuard, peer: SocketAddr, ctx: Arc<HandlerContext>) -> Self {
        Self { guard, peer, ctx }
    }

    /// Run the read loop until the peer goes away or `shutdown` fires.
    ///
    /// A request that is being handled when `shutdown` fires runs to
    /// completion first. The session leaves the live set when this returns.
    pub async fn run(self, socket: WebSocket, shutdown: CancellationToken) -> SessionEnd {
        let id = self.guard.id();
        let peer = self.peer;
        tracing::info!(%id, %peer, "websocket connection");

        let (tx, mut rx) = socket.split();
        let mut responder = WsResponder { tx };

        let end = loop {
            let msg = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break SessionEnd::Shutdown,
                msg = rx.next() => msg,
            };

            let payload = match msg {
                Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                Some(Ok(Message::Binary(data))) => data.to_vec(),
                Some(Ok(Message::Close(_))) | None => break SessionEnd::Closed,
                Some(Ok(_)) => continue, // Ping/Pong handled automatically
                Some(Err(e)) => {
                    tracing::debug!(%id, error = %e, "websocket receive failed");
                    break SessionEnd::Closed;
                }
            };

            if let Err(SendError::Closed) = self.handle_message(&payload, &mut responder).await {
                break SessionEnd::Closed;
            }
        };

        if end == SessionEnd::Shutdown {
            tracing::debug!(%id, "session received shutdown signal, closing");
            let close_frame = CloseFrame {
                code: axum::extract::ws::close_code::NORMAL,
                reason: "server shutting down".into(),
            };
            let _ = responder.tx.send(Message::Close(Some(close_frame))).await;
            let _ = responder.tx.flush().await;
        }

        tracing::info!(%id, %peer, ?end, "websocket connection ended");
        end
    }

    /// Parse and dispatch one message. Malformed messages are logged and
    /// dropped; only a closed channel is reported back.
    async fn handle_message<R: Responder>(
        &self,
        payload: &[u8],
        responder: &mut R,
    ) -> Result<(), SendError> {
        let request = match Request::parse(payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(id = %self.guard.id(), error = %e, "error while handling request");
                return Ok(());
            }
        };
        tracing::info!(method = ?request.method, id = ?request.id, "request received");

        match dispatch(&self.ctx, &request, responder).await {
            Ok(()) => Ok(()),
            Err(SendError::Closed) => {
                tracing::debug!(id = %self.guard.id(), "channel closed while responding");
                Err(SendError::Closed)
            }
            Err(e) => {
                tracing::warn!(id = %self.guard.id(), error = %e, "failed to send response");
                Ok(())
            }
        }
    }
}
