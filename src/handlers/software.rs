use serde_json::{json, Map};
use std::path::PathBuf;

use super::{Followup, HandlerContext};
use crate::api::ws_methods::{Method, Reply, Request, Responder, SendError};
use crate::exec::CommandSpec;
use crate::keyvalue::KeyValueFile;

const VERSION_FILE: &str = "VERSION.txt";
const CURRENT_VERSION: &str = "CURRENT_VERSION";
const FALLBACK_VERSION: &str = "FALLBACK_VERSION";

fn updates_script(ctx: &HandlerContext) -> String {
    ctx.paths
        .system_dir
        .join("updates.sh")
        .to_string_lossy()
        .into_owned()
}

/// Refresh the update cache, then report installed, latest and fallback
/// versions. The result is sent even when the check or a file read fails.
pub async fn check_software_versions<R: Responder>(
    ctx: &HandlerContext,
    reply: &mut Reply<'_, R>,
) -> Result<(), SendError> {
    tracing::info!("check_software_versions");

    let spec = CommandSpec::captured(updates_script(ctx), ["check"]);
    match ctx.runner.run(&spec).await {
        Ok(output) if output.success() => {
            reply.info(0, "Software updates checked successfully").await?
        }
        Ok(output) => {
            reply
                .failure(output.code, "Failed to check software updates")
                .await?
        }
        Err(e) => {
            tracing::warn!(error = %e, "error checking software updates");
            reply.failure(-1, "Error to check software updates").await?
        }
    }

    let installed_path: PathBuf = ctx.paths.software_dir.join(VERSION_FILE);
    let installed_version = match KeyValueFile::load(&installed_path).await {
        Ok(file) => file.get(CURRENT_VERSION).map(str::to_string),
        Err(e) => {
            tracing::warn!(path = %installed_path.display(), error = %e, "error reading installed version");
            reply.failure(-1, "Error to check installed version").await?;
            None
        }
    };

    let updates_path = ctx.paths.updates_dir.join(VERSION_FILE);
    let (latest_version, fallback_version) = match KeyValueFile::load(&updates_path).await {
        Ok(file) => (
            file.get(CURRENT_VERSION).map(str::to_string),
            file.get(FALLBACK_VERSION).map(str::to_string),
        ),
        Err(e) => {
            tracing::warn!(path = %updates_path.display(), error = %e, "error reading updated versions");
            reply.failure(-1, "Error to check updated versions").await?;
            (None, None)
        }
    };
    tracing::debug!(?installed_version, ?latest_version, ?fallback_version, "versions");

    let mut result = Map::new();
    result.insert("installed_version".into(), json!(installed_version));
    result.insert("latest_version".into(), json!(latest_version));
    result.insert("fallback_version".into(), json!(fallback_version));
    reply.result(result).await
}

/// Install `params.version`, then restart the system on success.
pub async fn install_software<R: Responder>(
    ctx: &HandlerContext,
    request: &Request,
    reply: &mut Reply<'_, R>,
) -> Result<Followup, SendError> {
    let Some(version) = request.param_str("version").filter(|v| !v.is_empty()) else {
        reply.failure(-1, "Software version is not set").await?;
        return Ok(Followup::Done);
    };
    tracing::info!(%version, "install_software");

    reply.info(0, "Installation takes time, please wait...").await?;

    let spec = CommandSpec::captured(updates_script(ctx), ["install".to_string(), version.clone()]);
    match ctx.runner.run(&spec).await {
        Ok(output) if output.success() => {
            reply
                .info(output.code, format!("Software {} installed successfully", version))
                .await?;
            Ok(Followup::Then(Method::RestartSystem))
        }
        Ok(output) => {
            reply
                .failure(output.code, format!("Failed to install software {}", version))
                .await?;
            Ok(Followup::Done)
        }
        Err(e) => {
            tracing::warn!(%version, error = %e, "error installing software");
            reply
                .failure(-1, format!("Error to install software {}", version))
                .await?;
            Ok(Followup::Done)
        }
    }
}
