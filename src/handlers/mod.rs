//! Method handlers.
//!
//! Each handler sends zero or more informational statuses followed by exactly
//! one terminal envelope. Collaborator failures are turned into status
//! envelopes here; only a failed send escapes.

pub mod software;
pub mod system;
pub mod wifi;

use std::sync::Arc;

use crate::api::ws_methods::{Method, Reply, Request, Responder, SendError};
use crate::config::Paths;
use crate::exec::{CommandRunner, SystemRunner};
use crate::netif::{AddressSource, SystemAddresses};

/// Everything a handler may touch outside the channel.
pub struct HandlerContext {
    pub paths: Paths,
    pub runner: Arc<dyn CommandRunner>,
    pub addresses: Arc<dyn AddressSource>,
}

impl HandlerContext {
    pub fn new(
        paths: Paths,
        runner: Arc<dyn CommandRunner>,
        addresses: Arc<dyn AddressSource>,
    ) -> Self {
        tracing::info!(
            software_dir = %paths.software_dir.display(),
            network_dir = %paths.network_dir.display(),
            system_dir = %paths.system_dir.display(),
            updates_dir = %paths.updates_dir.display(),
            "handler paths"
        );
        Self {
            paths,
            runner,
            addresses,
        }
    }

    /// Context backed by the host: real commands and interfaces.
    pub fn system(paths: Paths) -> Self {
        Self::new(paths, Arc::new(SystemRunner), Arc::new(SystemAddresses))
    }
}

/// What the dispatcher should do once a handler has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Followup {
    Done,
    /// Run another method with the same id and empty params.
    Then(Method),
}

/// Run the handler for `method`.
pub(crate) async fn call<R: Responder>(
    method: Method,
    ctx: &HandlerContext,
    request: &Request,
    reply: &mut Reply<'_, R>,
) -> Result<Followup, SendError> {
    match method {
        Method::CheckSystemStatus => system::check_system_status(reply).await?,
        Method::RestartSystem => system::restart_system(ctx, reply).await?,
        Method::ShutdownSystem => system::shutdown_system(ctx, reply).await?,
        Method::CheckSoftwareVersions => software::check_software_versions(ctx, reply).await?,
        Method::InstallSoftware => return software::install_software(ctx, request, reply).await,
        Method::CheckWifiApStatus => wifi::check_wifi_ap_status(ctx, reply).await?,
        Method::SetupWifiAp => wifi::setup_wifi_ap(request, reply).await?,
        Method::CheckWifiStaStatus => wifi::check_wifi_sta_status(ctx, reply).await?,
        Method::SetupWifiSta => wifi::setup_wifi_sta(ctx, request, reply).await?,
    }
    Ok(Followup::Done)
}
