use super::HandlerContext;
use crate::api::ws_methods::{Reply, Responder, SendError};
use crate::exec::CommandSpec;

pub async fn check_system_status<R: Responder>(reply: &mut Reply<'_, R>) -> Result<(), SendError> {
    tracing::info!("check_system_status");
    reply.failure(-1, "Not implemented").await
}

pub async fn restart_system<R: Responder>(
    ctx: &HandlerContext,
    reply: &mut Reply<'_, R>,
) -> Result<(), SendError> {
    tracing::warn!("restart_system");
    power_action(ctx, reply, PowerAction::Restart).await
}

pub async fn shutdown_system<R: Responder>(
    ctx: &HandlerContext,
    reply: &mut Reply<'_, R>,
) -> Result<(), SendError> {
    tracing::warn!("shutdown_system");
    power_action(ctx, reply, PowerAction::Shutdown).await
}

#[derive(Debug, Clone, Copy)]
enum PowerAction {
    Restart,
    Shutdown,
}

impl PowerAction {
    fn command(self) -> &'static str {
        match self {
            PowerAction::Restart => "reboot",
            PowerAction::Shutdown => "shutdown now",
        }
    }

    fn scheduled(self) -> &'static str {
        match self {
            PowerAction::Restart => "System restart, please reconnect later",
            PowerAction::Shutdown => "System shutdown in seconds",
        }
    }

    fn failed(self) -> &'static str {
        match self {
            PowerAction::Restart => "Failed to restart the system",
            PowerAction::Shutdown => "Failed to shutdown the system",
        }
    }

    fn errored(self) -> &'static str {
        match self {
            PowerAction::Restart => "Error to restart the system",
            PowerAction::Shutdown => "Error to shutdown the system",
        }
    }
}

/// Schedule a delayed reboot or poweroff. A successfully scheduled action is
/// still reported with code -1: the client is about to lose its connection.
async fn power_action<R: Responder>(
    ctx: &HandlerContext,
    reply: &mut Reply<'_, R>,
    action: PowerAction,
) -> Result<(), SendError> {
    let spec = CommandSpec::detached_root(action.command());
    match ctx.runner.run(&spec).await {
        Ok(output) if output.success() => reply.info(-1, action.scheduled()).await,
        Ok(output) => reply.failure(output.code, action.failed()).await,
        Err(e) => {
            tracing::warn!(?action, error = %e, "failed to schedule power action");
            reply.failure(-1, action.errored()).await
        }
    }
}
