pub mod ws_methods;

use axum::{
    extract::{ConnectInfo, State, WebSocketUpgrade},
    response::IntoResponse,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::handlers::HandlerContext;
use crate::session::{Session, SessionSet};

/// Shared state of the control channel server.
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<HandlerContext>,
    pub sessions: SessionSet,
    /// Cancelled when the server stops.
    pub shutdown: CancellationToken,
    /// Tracks running sessions so stop can wait for them.
    pub tracker: TaskTracker,
}

impl AppState {
    pub fn new(context: Arc<HandlerContext>, sessions: SessionSet) -> Self {
        Self {
            context,
            sessions,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }
}

/// Router for the control channel. Any path upgrades to a websocket session.
pub fn router(state: AppState) -> Router {
    Router::new().fallback(ws_session).with_state(state)
}

async fn ws_session(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        // Held until the session ends so stop() waits for it.
        let _token = state.tracker.token();
        let guard = state.sessions.insert(peer);
        let session = Session::new(guard, peer, state.context.clone());
        session.run(socket, state.shutdown.clone()).await;
    })
}
