use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use kasa_protocol::Credentials;
use tracing::warn;

use crate::discover::{DiscoveryOptions, DEFAULT_DISCOVERY_PACKETS, DEFAULT_TARGET};

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub credentials: CredentialsConfig,
    pub discovery: DiscoveryConfig,
    pub connection: ConnectionConfig,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Command printing the password (e.g. "pass show kasa").
    /// The command is run via `sh -c`.
    pub password_cmd: Option<String>,
}

impl CredentialsConfig {
    /// Resolve the password from password_cmd, the file, or KASA_PASSWORD.
    pub fn resolve_password(&self) -> io::Result<String> {
        if let Some(cmd) = &self.password_cmd {
            let output = Command::new("sh").arg("-c").arg(cmd).output()?;

            if output.status.success() {
                let password = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !password.is_empty() {
                    return Ok(password);
                }
            }
        }

        if let Some(password) = &self.password {
            return Ok(password.clone());
        }

        std::env::var("KASA_PASSWORD").map_err(|_| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "KASA_PASSWORD not set and no password or password_cmd configured",
            )
        })
    }

    pub fn resolve_username(&self) -> Option<String> {
        self.username
            .clone()
            .or_else(|| std::env::var("KASA_USERNAME").ok())
    }

    /// Credentials only when both halves are known.
    pub fn resolve(&self) -> Option<Credentials> {
        let username = self.resolve_username()?;
        let password = self.resolve_password().ok()?;
        Some(Credentials::new(username, password))
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Broadcast address probes are sent to.
    pub target: String,
    /// Seconds to wait for replies.
    pub timeout: u64,
    /// Number of probe rounds.
    pub packets: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET.to_string(),
            timeout: 5,
            packets: DEFAULT_DISCOVERY_PACKETS,
        }
    }
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Per-request timeout in seconds.
    pub timeout: Option<u64>,
    /// Maximum SMART requests per multi-request.
    pub batch_size: Option<usize>,
}

impl Config {
    pub fn load_or_default() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                warn!("failed to parse {}: {e}", path.display());
                Config::default()
            }),
            Err(_) => Config::default(),
        }
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions::default()
            .with_target(self.discovery.target.clone())
            .with_timeout(Duration::from_secs(self.discovery.timeout))
            .with_packets(self.discovery.packets)
            .with_credentials(self.credentials.resolve())
            .with_device_timeout(self.connection.timeout)
    }
}

pub fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("kasa").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.credentials.username, None);
        assert_eq!(cfg.discovery.target, "255.255.255.255");
        assert_eq!(cfg.discovery.timeout, 5);
        assert_eq!(cfg.discovery.packets, 3);
        assert_eq!(cfg.connection.batch_size, None);
    }

    #[test]
    fn parse_toml() {
        let toml_str = r#"
[credentials]
username = "me@example.com"
password_cmd = "echo secret"

[discovery]
target = "192.168.1.255"
timeout = 10

[connection]
batch_size = 5
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.credentials.username.as_deref(), Some("me@example.com"));
        assert_eq!(cfg.discovery.target, "192.168.1.255");
        assert_eq!(cfg.discovery.timeout, 10);
        assert_eq!(cfg.discovery.packets, 3);
        assert_eq!(cfg.connection.batch_size, Some(5));
        assert_eq!(cfg.connection.timeout, None);
    }

    #[test]
    fn parse_empty_toml() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn password_from_cmd() {
        let cfg = CredentialsConfig {
            password_cmd: Some("echo hunter2".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_password().unwrap(), "hunter2");
    }

    #[test]
    fn failing_cmd_falls_back_to_file_password() {
        let cfg = CredentialsConfig {
            password: Some("from-file".to_string()),
            password_cmd: Some("exit 1".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_password().unwrap(), "from-file");
    }

    #[test]
    fn resolve_needs_both_halves() {
        let cfg = CredentialsConfig {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            password_cmd: None,
        };
        assert_eq!(cfg.resolve(), Some(Credentials::new("user", "pass")));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[discovery]\npackets = 1").unwrap();
        let cfg = Config::load_from(file.path());
        assert_eq!(cfg.discovery.packets, 1);
        assert_eq!(cfg.discovery.timeout, 5);
    }

    #[test]
    fn bad_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[discovery\npackets = ").unwrap();
        assert_eq!(Config::load_from(file.path()), Config::default());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("absent.toml"));
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn config_path_default() {
        assert!(config_path().to_string_lossy().ends_with("kasa/config.toml"));
    }

    #[test]
    fn discovery_options_follow_config() {
        let cfg = Config {
            discovery: DiscoveryConfig {
                target: "10.0.0.255".to_string(),
                timeout: 2,
                packets: 4,
            },
            ..Default::default()
        };
        let options = cfg.discovery_options();
        assert_eq!(options.target, "10.0.0.255");
        assert_eq!(options.discovery_timeout, Duration::from_secs(2));
        assert_eq!(options.discovery_packets, 4);
    }
}
