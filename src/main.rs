//! net-admin - network administration service
//!
//! Runs a websocket control channel for system, software and WiFi management
//! next to a static file server for the browser UI. Stops on Ctrl-C.

use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use net_admin::config::{Config, ConfigError};
use net_admin::service::{self, ServiceError};

/// net-admin - network administration service
#[derive(Parser, Debug)]
#[command(name = "net-admin", version, about, long_about = None)]
struct Cli {
    /// Path to the JSON config file
    #[arg(
        short = 'c',
        long,
        alias = "config_file",
        env = "NET_ADMIN_CONFIG",
        default_value = "net-admin.json"
    )]
    config_file: PathBuf,

    /// Log level: trace, debug, info, warn(ing), error or critical
    #[arg(long, alias = "log_level", default_value = "debug", value_parser = parse_log_level)]
    log_level: String,
}

#[derive(Error, Debug)]
pub enum NetAdminError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),
}

/// Map a level name onto a tracing directive.
fn parse_log_level(level: &str) -> Result<String, String> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok("trace".into()),
        "debug" => Ok("debug".into()),
        "info" => Ok("info".into()),
        "warn" | "warning" => Ok("warn".into()),
        "error" | "critical" => Ok("error".into()),
        other => Err(format!("unknown log level '{}'", other)),
    }
}

fn main() -> Result<(), NetAdminError> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = Config::load(&cli.config_file)?;
    tracing::info!(
        ws_port = config.ws_port,
        http_port = config.http_port,
        "starting net-admin"
    );
    service::run_service(&config)?;
    tracing::info!("net-admin stopped");
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| format!("net_admin={level},tower_http={level}")),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
