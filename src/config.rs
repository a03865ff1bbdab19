use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Service configuration, loaded from a JSON file.
///
/// Every key is optional. Keys the service does not know about are ignored so
/// that one file can be shared with the web UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port of the websocket control channel.
    pub ws_port: u16,
    /// Port of the static file server.
    pub http_port: u16,
    /// Address both servers bind to.
    pub bind_address: IpAddr,
    /// Root of the installed software tree (holds `network/`, `system/`,
    /// `updates/` and `VERSION.txt`).
    pub software_dir: Option<PathBuf>,
    /// Directory served by the static file server.
    pub web_root: PathBuf,
    pub wpa_supplicant_conf: PathBuf,
    pub hostapd_conf: PathBuf,
    /// Interface used in station mode.
    pub sta_interface: String,
    /// Interface used in access point mode.
    pub ap_interface: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_port: 8090,
            http_port: 8080,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            software_dir: None,
            web_root: PathBuf::from("web-ui"),
            wpa_supplicant_conf: PathBuf::from("/etc/wpa_supplicant/wpa_supplicant.conf"),
            hostapd_conf: PathBuf::from("/etc/hostapd/hostapd.conf"),
            sta_interface: "wlan0".to_string(),
            ap_interface: "uap0".to_string(),
        }
    }
}

impl Config {
    /// Load config from a JSON file path. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        tracing::info!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    pub fn ws_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.ws_port)
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.http_port)
    }

    /// Resolve the directory layout the handlers operate on.
    pub fn paths(&self) -> Paths {
        let software_dir = self
            .software_dir
            .clone()
            .unwrap_or_else(default_software_dir);
        Paths {
            network_dir: software_dir.join("network"),
            system_dir: software_dir.join("system"),
            updates_dir: software_dir.join("updates"),
            software_dir,
            wpa_supplicant_conf: self.wpa_supplicant_conf.clone(),
            hostapd_conf: self.hostapd_conf.clone(),
            sta_interface: self.sta_interface.clone(),
            ap_interface: self.ap_interface.clone(),
        }
    }
}

/// The parent of the directory holding the executable, mirroring an install
/// where the service binary lives in `<software>/web-service/`.
fn default_software_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().and_then(Path::parent).map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Filesystem locations and interface names used by the method handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
    pub software_dir: PathBuf,
    pub network_dir: PathBuf,
    pub system_dir: PathBuf,
    pub updates_dir: PathBuf,
    pub wpa_supplicant_conf: PathBuf,
    pub hostapd_conf: PathBuf,
    pub sta_interface: String,
    pub ap_interface: String,
}

impl Paths {
    /// Layout rooted at `software_dir` with default wifi locations.
    pub fn under(software_dir: impl Into<PathBuf>) -> Self {
        Config {
            software_dir: Some(software_dir.into()),
            ..Config::default()
        }
        .paths()
    }
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
