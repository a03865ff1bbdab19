use serde::Serialize;
use serde_json::Map;
use std::io;
use std::path::Path;

use super::HandlerContext;
use crate::api::ws_methods::{Reply, Request, Responder, SendError};
use crate::exec::CommandSpec;
use crate::keyvalue::KeyValueFile;

/// SSID and password as configured on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub ssid: Option<String>,
    pub password: Option<String>,
}

/// Read credentials from a wifi config file. A missing file means nothing
/// is configured.
pub async fn read_credentials(path: &Path, password_key: &str) -> io::Result<Credentials> {
    let file = KeyValueFile::load_or_empty(path).await?;
    Ok(Credentials {
        ssid: file.get("ssid").map(str::to_string),
        password: file.get(password_key).map(str::to_string),
    })
}

#[derive(Debug, Clone, Copy)]
enum WifiMode {
    AccessPoint,
    Station,
}

impl WifiMode {
    fn label(self) -> &'static str {
        match self {
            WifiMode::AccessPoint => "AP",
            WifiMode::Station => "STA",
        }
    }

    fn conf(self, ctx: &HandlerContext) -> &Path {
        match self {
            WifiMode::AccessPoint => &ctx.paths.hostapd_conf,
            WifiMode::Station => &ctx.paths.wpa_supplicant_conf,
        }
    }

    fn password_key(self) -> &'static str {
        match self {
            WifiMode::AccessPoint => "wpa_passphrase",
            WifiMode::Station => "psk",
        }
    }

    fn interface(self, ctx: &HandlerContext) -> &str {
        match self {
            WifiMode::AccessPoint => &ctx.paths.ap_interface,
            WifiMode::Station => &ctx.paths.sta_interface,
        }
    }
}

pub async fn check_wifi_ap_status<R: Responder>(
    ctx: &HandlerContext,
    reply: &mut Reply<'_, R>,
) -> Result<(), SendError> {
    tracing::info!("check_wifi_ap_status");
    check_status(ctx, reply, WifiMode::AccessPoint).await
}

pub async fn check_wifi_sta_status<R: Responder>(
    ctx: &HandlerContext,
    reply: &mut Reply<'_, R>,
) -> Result<(), SendError> {
    tracing::info!("check_wifi_sta_status");
    check_status(ctx, reply, WifiMode::Station).await
}

/// Report configured credentials and the live address of the mode's
/// interface. A missing SSID is announced first but the result is still sent.
async fn check_status<R: Responder>(
    ctx: &HandlerContext,
    reply: &mut Reply<'_, R>,
    mode: WifiMode,
) -> Result<(), SendError> {
    let conf = mode.conf(ctx);
    let setup = match read_credentials(conf, mode.password_key()).await {
        Ok(credentials) => {
            tracing::debug!(ssid = ?credentials.ssid, "configured wifi");
            if credentials.ssid.is_none() {
                reply
                    .info(0, format!("WiFi {} is not setup", mode.label()))
                    .await?;
            }
            credentials
        }
        Err(e) => {
            tracing::warn!(path = %conf.display(), error = %e, "error reading wifi config");
            reply
                .failure(-1, format!("Error to check WiFi {}", mode.label()))
                .await?;
            Credentials::default()
        }
    };

    let interface = mode.interface(ctx);
    let address = match ctx.addresses.ipv4_address(interface) {
        Ok(address) => {
            tracing::info!(interface, ?address, "interface address");
            address
        }
        Err(e) => {
            tracing::warn!(interface, error = %e, "error checking interface address");
            reply.failure(-1, "Error to check IP address").await?;
            None
        }
    };

    let mut result = Map::new();
    result.insert("setup".into(), serde_json::to_value(&setup)?);
    result.insert("address".into(), serde_json::to_value(&address)?);
    reply.result(result).await
}

pub async fn setup_wifi_ap<R: Responder>(
    request: &Request,
    reply: &mut Reply<'_, R>,
) -> Result<(), SendError> {
    tracing::info!(params = ?request.params, "setup_wifi_ap");
    reply.failure(-1, "Not implemented").await
}

/// Point the station at a new network and restart networking.
pub async fn setup_wifi_sta<R: Responder>(
    ctx: &HandlerContext,
    request: &Request,
    reply: &mut Reply<'_, R>,
) -> Result<(), SendError> {
    let Some(ssid) = request.param_str("ssid") else {
        return reply.failure(-1, "WiFi SSID is not set").await;
    };
    let password = request.param_str("password");
    tracing::info!(%ssid, "setup_wifi_sta");

    let current = match read_credentials(&ctx.paths.wpa_supplicant_conf, "psk").await {
        Ok(credentials) => credentials,
        Err(e) => {
            tracing::warn!(error = %e, "error reading current wifi settings");
            Credentials::default()
        }
    };
    if current.ssid.as_deref() == Some(ssid.as_str()) && current.password == password {
        return reply.failure(-1, "WiFi settings has no change").await;
    }

    let script = ctx.paths.network_dir.join("setup-wifi-sta.sh");
    let mut args = vec![ssid];
    args.extend(password);
    let spec = CommandSpec::captured(script.to_string_lossy(), args);
    match ctx.runner.run(&spec).await {
        Ok(output) if output.success() => {
            reply.info(output.code, "WiFi settings changed").await?;
            restart_network(ctx, reply).await
        }
        Ok(output) => {
            reply
                .failure(output.code, "Failed to change WiFi settings")
                .await
        }
        Err(e) => {
            tracing::warn!(error = %e, "error changing wifi settings");
            reply.failure(-1, "Error to change WiFi settings").await
        }
    }
}

async fn restart_network<R: Responder>(
    ctx: &HandlerContext,
    reply: &mut Reply<'_, R>,
) -> Result<(), SendError> {
    tracing::info!("restart network");
    let script = ctx.paths.network_dir.join("restart-wifi.sh");
    let spec = CommandSpec::detached_root(&format!("bash {}", script.display()));
    match ctx.runner.run(&spec).await {
        Ok(output) if output.success() => {
            reply.info(-1, "Network restart, please reconnect later").await
        }
        Ok(output) => reply.failure(output.code, "Failed to restart network").await,
        Err(e) => {
            tracing::warn!(error = %e, "error restarting network");
            reply.failure(-1, "Error to restart network").await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ws_methods::Response;
    use crate::handlers::test_support::{context_in, StubAddresses, StubRunner};
    use crate::netif::InterfaceAddress;
    use serde_json::{json, Value};
    use std::net::Ipv4Addr;

    fn setup_request(params: Value) -> Request {
        Request::from_value(json!({ "method": "setup_wifi_sta", "params": params, "id": 3 }))
            .unwrap()
    }

    #[tokio::test]
    async fn sta_status_not_setup_sends_notice_then_result() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), StubRunner::new(), StubAddresses::none());
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(5)), &mut sent);
        check_wifi_sta_status(&ctx, &mut reply).await.unwrap();

        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Response::info(Some(json!(5)), 0, "WiFi STA is not setup"));
        assert_eq!(
            serde_json::to_value(&sent[1]).unwrap(),
            json!({
                "result": { "setup": { "ssid": null, "password": null }, "address": null },
                "id": 5,
            })
        );
    }

    #[tokio::test]
    async fn sta_status_configured_and_connected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("wpa_supplicant.conf"),
            "network={\n    ssid=\"HomeNet\"\n    psk=\"hunter22\"\n}\n",
        )
        .unwrap();
        let addresses = StubAddresses::with(InterfaceAddress {
            addr: Ipv4Addr::new(10, 0, 0, 12),
            netmask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            broadcast: Some(Ipv4Addr::new(10, 0, 0, 255)),
        });
        let ctx = context_in(dir.path(), StubRunner::new(), addresses);
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(5)), &mut sent);
        check_wifi_sta_status(&ctx, &mut reply).await.unwrap();

        assert_eq!(sent.len(), 1);
        let v = serde_json::to_value(&sent[0]).unwrap();
        assert_eq!(v["result"]["setup"]["ssid"], "HomeNet");
        assert_eq!(v["result"]["setup"]["password"], "hunter22");
        assert_eq!(v["result"]["address"]["addr"], "10.0.0.12");
        assert_eq!(v["result"]["address"]["broadcast"], "10.0.0.255");
    }

    #[tokio::test]
    async fn ap_status_reads_hostapd_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hostapd.conf"),
            "interface=uap0\nssid=BoxAP\nwpa_passphrase=letmein1\n",
        )
        .unwrap();
        let ctx = context_in(dir.path(), StubRunner::new(), StubAddresses::none());
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(1)), &mut sent);
        check_wifi_ap_status(&ctx, &mut reply).await.unwrap();

        assert_eq!(sent.len(), 1);
        let v = serde_json::to_value(&sent[0]).unwrap();
        assert_eq!(v["result"]["setup"], json!({ "ssid": "BoxAP", "password": "letmein1" }));
        assert_eq!(v["result"]["address"], Value::Null);
    }

    #[tokio::test]
    async fn ap_status_not_setup_sends_notice_then_result() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), StubRunner::new(), StubAddresses::none());
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(4)), &mut sent);
        check_wifi_ap_status(&ctx, &mut reply).await.unwrap();

        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Response::info(Some(json!(4)), 0, "WiFi AP is not setup"));
        assert_eq!(
            serde_json::to_value(&sent[1]).unwrap(),
            json!({
                "result": { "setup": { "ssid": null, "password": null }, "address": null },
                "id": 4,
            })
        );
    }

    #[tokio::test]
    async fn ap_status_lookup_error_still_sends_result() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hostapd.conf"), "ssid=BoxAP\n").unwrap();
        let ctx = context_in(dir.path(), StubRunner::new(), StubAddresses::failing());
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(1)), &mut sent);
        check_wifi_ap_status(&ctx, &mut reply).await.unwrap();

        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Response::failure(Some(json!(1)), -1, "Error to check IP address"));
        assert!(sent[1].is_result());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_config_reports_error_then_result() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be fails to read as text.
        std::fs::create_dir(dir.path().join("wpa_supplicant.conf")).unwrap();
        let ctx = context_in(dir.path(), StubRunner::new(), StubAddresses::none());
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(1)), &mut sent);
        check_wifi_sta_status(&ctx, &mut reply).await.unwrap();

        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Response::failure(Some(json!(1)), -1, "Error to check WiFi STA"));
        assert!(sent[1].is_result());
    }

    #[tokio::test]
    async fn setup_sta_requires_ssid() {
        let dir = tempfile::tempdir().unwrap();
        let runner = StubRunner::new();
        let ctx = context_in(dir.path(), runner.clone(), StubAddresses::none());
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(3)), &mut sent);
        setup_wifi_sta(&ctx, &setup_request(json!({ "password": "x" })), &mut reply)
            .await
            .unwrap();

        assert_eq!(sent, vec![Response::failure(Some(json!(3)), -1, "WiFi SSID is not set")]);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn setup_sta_without_change() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wpa_supplicant.conf"), "ssid=\"Cafe\"\npsk=\"pw\"\n").unwrap();
        let runner = StubRunner::new();
        let ctx = context_in(dir.path(), runner.clone(), StubAddresses::none());
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(3)), &mut sent);
        setup_wifi_sta(
            &ctx,
            &setup_request(json!({ "ssid": "Cafe", "password": "pw" })),
            &mut reply,
        )
        .await
        .unwrap();

        assert_eq!(
            sent,
            vec![Response::failure(Some(json!(3)), -1, "WiFi settings has no change")]
        );
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn setup_sta_applies_and_restarts_network() {
        let dir = tempfile::tempdir().unwrap();
        let runner = StubRunner::new().with_codes([0, 0]);
        let ctx = context_in(dir.path(), runner.clone(), StubAddresses::none());
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(3)), &mut sent);
        setup_wifi_sta(
            &ctx,
            &setup_request(json!({ "ssid": "Cafe", "password": "pw" })),
            &mut reply,
        )
        .await
        .unwrap();

        assert_eq!(
            sent,
            vec![
                Response::info(Some(json!(3)), 0, "WiFi settings changed"),
                Response::info(Some(json!(3)), -1, "Network restart, please reconnect later"),
            ]
        );
        let calls = runner.calls();
        assert!(calls[0].program.ends_with("network/setup-wifi-sta.sh"));
        assert_eq!(calls[0].args, vec!["Cafe", "pw"]);
        assert_eq!(calls[1].program, "sudo");
        assert!(calls[1].args[3].ends_with("network/restart-wifi.sh"));
    }

    #[tokio::test]
    async fn setup_sta_open_network_omits_password() {
        let dir = tempfile::tempdir().unwrap();
        let runner = StubRunner::new().with_codes([0, 0]);
        let ctx = context_in(dir.path(), runner.clone(), StubAddresses::none());
        let mut sent = Vec::new();
        let mut reply = Reply::new(None, &mut sent);
        setup_wifi_sta(&ctx, &setup_request(json!({ "ssid": "Open" })), &mut reply)
            .await
            .unwrap();

        assert_eq!(runner.calls()[0].args, vec!["Open"]);
    }

    #[tokio::test]
    async fn setup_sta_script_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = StubRunner::new().with_codes([4]);
        let ctx = context_in(dir.path(), runner.clone(), StubAddresses::none());
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(3)), &mut sent);
        setup_wifi_sta(&ctx, &setup_request(json!({ "ssid": "Cafe" })), &mut reply)
            .await
            .unwrap();

        assert_eq!(
            sent,
            vec![Response::failure(Some(json!(3)), 4, "Failed to change WiFi settings")]
        );
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn setup_sta_network_restart_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = StubRunner::new().with_codes([0, 1]);
        let ctx = context_in(dir.path(), runner, StubAddresses::none());
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(3)), &mut sent);
        setup_wifi_sta(&ctx, &setup_request(json!({ "ssid": "Cafe" })), &mut reply)
            .await
            .unwrap();

        assert_eq!(sent[1], Response::failure(Some(json!(3)), 1, "Failed to restart network"));
    }

    #[tokio::test]
    async fn setup_sta_script_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = StubRunner::new().with_error(io::ErrorKind::NotFound);
        let ctx = context_in(dir.path(), runner.clone(), StubAddresses::none());
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(3)), &mut sent);
        setup_wifi_sta(&ctx, &setup_request(json!({ "ssid": "Cafe" })), &mut reply)
            .await
            .unwrap();

        assert_eq!(
            sent,
            vec![Response::failure(Some(json!(3)), -1, "Error to change WiFi settings")]
        );
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn setup_sta_network_restart_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = StubRunner::new()
            .with_codes([0])
            .with_error(io::ErrorKind::PermissionDenied);
        let ctx = context_in(dir.path(), runner, StubAddresses::none());
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(3)), &mut sent);
        setup_wifi_sta(&ctx, &setup_request(json!({ "ssid": "Cafe" })), &mut reply)
            .await
            .unwrap();

        assert_eq!(
            sent,
            vec![
                Response::info(Some(json!(3)), 0, "WiFi settings changed"),
                Response::failure(Some(json!(3)), -1, "Error to restart network"),
            ]
        );
    }

    #[tokio::test]
    async fn setup_ap_not_implemented() {
        let mut sent = Vec::new();
        let mut reply = Reply::new(Some(json!(8)), &mut sent);
        setup_wifi_ap(&setup_request(json!({ "ssid": "x" })), &mut reply)
            .await
            .unwrap();
        assert_eq!(sent, vec![Response::failure(Some(json!(8)), -1, "Not implemented")]);
    }
}
