//! Static file server for the browser UI.
//!
//! Serves files from a directory on disk. `/` maps to the default document, and
//! a path without `.html` is rewritten to `<path>.html` when that file exists.

use axum::{
    extract::{Request, State},
    http::Uri,
    middleware::{self, Next},
    response::Response,
    Router,
};
use percent_encoding::percent_decode_str;
use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::server::{drain_until_deadline, Flavor, ServerError, ServerState, Worker};

/// Document served for `/`.
pub const DEFAULT_DOCUMENT: &str = "/net-admin.html";

/// Serves UI assets on its own thread and multi-thread runtime.
pub struct WebServer {
    addr: SocketAddr,
    root: PathBuf,
    worker: Worker,
}

impl WebServer {
    pub fn new(addr: SocketAddr, root: impl Into<PathBuf>) -> Self {
        Self {
            addr,
            root: root.into(),
            worker: Worker::new("http", Flavor::MultiThread),
        }
    }

    /// Start serving. No-op if already started.
    pub fn start(&self) -> Result<(), ServerError> {
        if !self.root.is_dir() {
            tracing::warn!(root = %self.root.display(), "web root is not a directory");
        }
        let app = router(self.root.clone());
        self.worker
            .start(self.addr, CancellationToken::new(), move |listener, cancel| {
                serve_web(listener, app, cancel)
            })
    }

    /// Stop serving. Open requests get
    /// [`SHUTDOWN_DRAIN_TIMEOUT`](crate::server::SHUTDOWN_DRAIN_TIMEOUT) to finish.
    /// No-op if not running.
    pub fn stop(&self) {
        self.worker.stop();
    }

    pub fn state(&self) -> ServerState {
        self.worker.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.worker.local_addr()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Router serving `root` with clean-URL rewriting and request tracing.
pub fn router(root: PathBuf) -> Router {
    let root = Arc::new(root);
    Router::new()
        .fallback_service(ServeDir::new(root.as_path()))
        .layer(middleware::from_fn_with_state(root, rewrite_clean_urls))
        .layer(TraceLayer::new_for_http())
}

async fn serve_web(
    listener: tokio::net::TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "http server listening");
    let serve = axum::serve(listener, app).with_graceful_shutdown(cancel.clone().cancelled_owned());
    drain_until_deadline(serve, &cancel).await
}

async fn rewrite_clean_urls(
    State(root): State<Arc<PathBuf>>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(path) = resolve(&root, req.uri().path()).await {
        let rewritten = match req.uri().query() {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        };
        match rewritten.parse::<Uri>() {
            Ok(uri) => {
                tracing::debug!(from = %req.uri(), to = %uri, "rewrote request path");
                *req.uri_mut() = uri;
            }
            Err(e) => tracing::debug!(error = %e, "rewritten path is not a valid uri"),
        }
    }
    next.run(req).await
}

/// The path a request for `path` should be served from, if it differs.
pub async fn resolve(root: &Path, path: &str) -> Option<String> {
    if path == "/" {
        return Some(DEFAULT_DOCUMENT.to_string());
    }
    let (relative, rewritten) = html_candidate(path)?;
    match tokio::fs::metadata(root.join(relative)).await {
        Ok(meta) if meta.is_file() => Some(rewritten),
        _ => None,
    }
}

/// `<path>.html` as a path relative to the asset root and as a request path.
/// `path` is percent-encoded; the relative path is decoded, the request path
/// keeps the original encoding. `None` when `path` already names an `.html`
/// file, ends in a directory, or tries to leave the root.
fn html_candidate(path: &str) -> Option<(PathBuf, String)> {
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    if decoded.ends_with(".html") || decoded.ends_with('/') {
        return None;
    }

    let mut relative = PathBuf::new();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    let file_name = relative.file_name()?.to_str()?.to_string();
    relative.set_file_name(format!("{}.html", file_name));
    Some((relative, format!("{}.html", path)))
}
