//! Runs both servers for the lifetime of the process.

use std::future::Future;
use std::io;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::handlers::HandlerContext;
use crate::server::{ChannelServer, ServerError};
use crate::web::WebServer;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("channel server: {0}")]
    Channel(#[source] ServerError),

    #[error("web server: {0}")]
    Web(#[source] ServerError),

    #[error("failed to wait for interrupt: {0}")]
    Signal(#[source] io::Error),
}

/// The control channel and static file servers, started and stopped as a pair.
pub struct Service {
    channel: ChannelServer,
    web: WebServer,
}

impl Service {
    pub fn new(config: &Config, context: Arc<HandlerContext>) -> Self {
        Self {
            channel: ChannelServer::new(config.ws_addr(), context),
            web: WebServer::new(config.http_addr(), config.web_root.clone()),
        }
    }

    /// Start the channel server, then the web server. If the web server fails
    /// to start the channel server is stopped again.
    pub fn start(&self) -> Result<(), ServiceError> {
        self.channel.start().map_err(ServiceError::Channel)?;
        if let Err(e) = self.web.start() {
            self.channel.stop();
            return Err(ServiceError::Web(e));
        }
        Ok(())
    }

    /// Stop the web server, then the channel server.
    pub fn stop(&self) {
        self.web.stop();
        self.channel.stop();
    }

    pub fn channel(&self) -> &ChannelServer {
        &self.channel
    }

    pub fn web(&self) -> &WebServer {
        &self.web
    }

    /// Start, block until `shutdown` completes, then stop.
    pub fn run_until<F>(&self, shutdown: F) -> Result<(), ServiceError>
    where
        F: Future<Output = io::Result<()>>,
    {
        self.start()?;

        let waited = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .and_then(|rt| rt.block_on(shutdown));
        match &waited {
            Ok(()) => tracing::warn!("interrupted, stopping"),
            Err(e) => tracing::error!(error = %e, "failed to wait for interrupt, stopping"),
        }

        self.stop();
        waited.map_err(ServiceError::Signal)
    }
}

/// Run the service with the host's collaborators until Ctrl-C.
pub fn run_service(config: &Config) -> Result<(), ServiceError> {
    let context = Arc::new(HandlerContext::system(config.paths()));
    let service = Service::new(config, context);
    service.run_until(tokio::signal::ctrl_c())
}
