//! Background servers.
//!
//! Each server owns a dedicated OS thread running its own tokio runtime, so
//! starting and stopping it never depends on the caller's executor. The
//! control channel runs on a current-thread runtime: every session shares one
//! cooperative scheduler and yields at channel I/O and subprocess waits.

use parking_lot::Mutex;
use std::future::{Future, IntoFuture};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::{self, AppState};
use crate::handlers::HandlerContext;
use crate::session::SessionSet;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to build runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("failed to spawn server thread: {0}")]
    Spawn(#[source] io::Error),
}

/// How long open HTTP connections get to finish once a server is stopping.
/// Connections still open after that are dropped with the runtime.
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of a background server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Which tokio scheduler a server thread runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    CurrentThread,
    MultiThread,
}

struct Running {
    cancel: CancellationToken,
    thread: JoinHandle<()>,
    local_addr: SocketAddr,
}

struct WorkerInner {
    state: ServerState,
    running: Option<Running>,
}

/// Runs a serve loop on its own thread with start/stop semantics.
///
/// `start` is a no-op unless stopped; `stop` is a no-op unless running and
/// returns once the thread has exited. Serve loops are expected to bound their
/// own shutdown, see [`drain_until_deadline`].
pub struct Worker {
    name: &'static str,
    flavor: Flavor,
    inner: Mutex<WorkerInner>,
}

impl Worker {
    pub fn new(name: &'static str, flavor: Flavor) -> Self {
        Self {
            name,
            flavor,
            inner: Mutex::new(WorkerInner {
                state: ServerState::Stopped,
                running: None,
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        self.inner.lock().state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().running.as_ref().map(|r| r.local_addr)
    }

    /// Bind `addr` and run `serve` on a fresh thread until `cancel` fires.
    pub fn start<F, Fut>(&self, addr: SocketAddr, cancel: CancellationToken, serve: F) -> Result<(), ServerError>
    where
        F: FnOnce(tokio::net::TcpListener, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<()>>,
    {
        let mut inner = self.inner.lock();
        if inner.state != ServerState::Stopped {
            tracing::debug!(server = self.name, state = ?inner.state, "start ignored");
            return Ok(());
        }
        inner.state = ServerState::Starting;

        match self.spawn(addr, cancel, serve) {
            Ok(running) => {
                tracing::info!(server = self.name, addr = %running.local_addr, "server started");
                inner.running = Some(running);
                inner.state = ServerState::Running;
                Ok(())
            }
            Err(e) => {
                inner.state = ServerState::Stopped;
                Err(e)
            }
        }
    }

    fn spawn<F, Fut>(&self, addr: SocketAddr, cancel: CancellationToken, serve: F) -> Result<Running, ServerError>
    where
        F: FnOnce(tokio::net::TcpListener, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<()>>,
    {
        let listener =
            std::net::TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let runtime = match self.flavor {
            Flavor::CurrentThread => tokio::runtime::Builder::new_current_thread(),
            Flavor::MultiThread => tokio::runtime::Builder::new_multi_thread(),
        }
        .enable_all()
        .thread_name(format!("net-admin-{}", self.name))
        .build()
        .map_err(ServerError::Runtime)?;

        let name = self.name;
        let token = cancel.clone();
        let thread = std::thread::Builder::new()
            .name(format!("net-admin-{}", name))
            .spawn(move || {
                let result = runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener)?;
                    serve(listener, token).await
                });
                if let Err(e) = result {
                    tracing::error!(server = name, error = %e, "server exited with error");
                }
            })
            .map_err(ServerError::Spawn)?;

        Ok(Running {
            cancel,
            thread,
            local_addr,
        })
    }

    /// Signal the serve loop to stop and wait for its thread to exit.
    pub fn stop(&self) {
        let running = {
            let mut inner = self.inner.lock();
            if inner.state != ServerState::Running {
                return;
            }
            inner.state = ServerState::Stopping;
            inner.running.take()
        };
        tracing::warn!(server = self.name, "stopping server");

        if let Some(running) = running {
            running.cancel.cancel();
            if running.thread.join().is_err() {
                tracing::error!(server = self.name, "server thread panicked");
            }
        }

        self.inner.lock().state = ServerState::Stopped;
        tracing::warn!(server = self.name, "server stopped");
    }
}

/// Accepts control channel connections and runs a session per connection.
pub struct ChannelServer {
    addr: SocketAddr,
    context: Arc<HandlerContext>,
    sessions: SessionSet,
    worker: Worker,
}

impl ChannelServer {
    pub fn new(addr: SocketAddr, context: Arc<HandlerContext>) -> Self {
        Self {
            addr,
            context,
            sessions: SessionSet::new(),
            worker: Worker::new("ws", Flavor::CurrentThread),
        }
    }

    /// Start accepting connections. No-op if already started.
    pub fn start(&self) -> Result<(), ServerError> {
        let state = AppState::new(self.context.clone(), self.sessions.clone());
        let cancel = state.shutdown.clone();
        self.worker
            .start(self.addr, cancel, move |listener, _cancel| serve_channel(listener, state))
    }

    /// Stop accepting, close every session and wait for in-flight requests
    /// to finish. Connections that never completed an upgrade are dropped
    /// after [`SHUTDOWN_DRAIN_TIMEOUT`]. No-op if not running.
    pub fn stop(&self) {
        self.worker.stop();
        let cleared = self.sessions.clear();
        if cleared > 0 {
            tracing::debug!(cleared, "cleared leftover sessions");
        }
    }

    pub fn state(&self) -> ServerState {
        self.worker.state()
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.worker.local_addr()
    }

    pub fn sessions(&self) -> &SessionSet {
        &self.sessions
    }
}

async fn serve_channel(listener: tokio::net::TcpListener, state: AppState) -> io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "websocket server listening");
    let shutdown = state.shutdown.clone();
    let tracker = state.tracker.clone();
    let app = api::router(state);

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    drain_until_deadline(serve, &shutdown).await?;

    // Upgraded sessions are not HTTP connections; wait for them separately.
    tracker.close();
    tracker.wait().await;
    Ok(())
}

/// Run `serve` to completion, but once `cancel` fires give it at most
/// [`SHUTDOWN_DRAIN_TIMEOUT`] to drain its connections.
pub(crate) async fn drain_until_deadline<F>(serve: F, cancel: &CancellationToken) -> io::Result<()>
where
    F: IntoFuture<Output = io::Result<()>>,
{
    let serve = serve.into_future();
    tokio::pin!(serve);
    tokio::select! {
        result = &mut serve => return result,
        _ = cancel.cancelled() => {}
    }

    match tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, serve).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                timeout = ?SHUTDOWN_DRAIN_TIMEOUT,
                "connections still open after drain deadline, dropping them"
            );
            Ok(())
        }
    }
}
