//! Configuration for a warren node

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::common::{Error, Result};

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Operating mode
    #[serde(default)]
    pub mode: Mode,

    /// Node ID (unique identifier; a random one is generated when empty)
    #[serde(default)]
    pub node_id: String,

    /// Cluster membership
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Key-value engine
    #[serde(default)]
    pub kv: KvConfig,

    /// HTTP API
    #[serde(default)]
    pub api: ApiConfig,

    /// TLS settings
    #[serde(default)]
    pub ssl: SslConfig,

    /// Performance tuning
    #[serde(default)]
    pub perf: PerfConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Single node, no peers
    #[default]
    Dev,
    /// Replicating member of a peer set
    Cluster,
}

/// Cluster membership configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterConfig {
    /// Address peers use to reach this node (base URL)
    #[serde(default)]
    pub advertise_addr: String,

    /// Peer base URLs
    #[serde(default)]
    pub peers: Vec<String>,
}

/// Key-value engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    /// Database directory
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Shared encryption key file (generated on first boot when absent)
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./warren-data/kv")
}
fn default_key_path() -> PathBuf {
    PathBuf::from("./warren-data/shared.key")
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            key_path: default_key_path(),
        }
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

/// TLS configuration. Termination is expected at the deployment front end;
/// these fields drive the advertised scheme and startup validation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SslConfig {
    #[serde(default)]
    pub enable: bool,

    #[serde(default)]
    pub certificate: String,

    #[serde(default)]
    pub key: String,
}

/// Performance tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfConfig {
    /// Capacity of the update and outbox channels
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_buffer_size() -> usize {
    1024
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.port == 0 {
            return Err(Error::InvalidConfig("api.port is required".into()));
        }
        if self.ssl.enable && (self.ssl.certificate.is_empty() || self.ssl.key.is_empty()) {
            return Err(Error::InvalidConfig(
                "ssl.certificate and ssl.key are required when ssl is enabled".into(),
            ));
        }
        if self.mode == Mode::Cluster && self.cluster.advertise_addr.is_empty() {
            return Err(Error::InvalidConfig(
                "cluster.advertise_addr is required in cluster mode".into(),
            ));
        }
        Ok(())
    }

    /// Scheme clients should use to reach the API.
    pub fn scheme(&self) -> &'static str {
        if self.ssl.enable {
            "https://"
        } else {
            "http://"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mode, Mode::Dev);
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.perf.buffer_size, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"api": {"port": 9000}}"#).unwrap();
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.kv.db_path, PathBuf::from("./warren-data/kv"));
    }

    #[test]
    fn test_cluster_mode_requires_advertise() {
        let config: Config = serde_json::from_str(r#"{"mode": "cluster"}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ssl_requires_cert_and_key() {
        let config: Config = serde_json::from_str(r#"{"ssl": {"enable": true}}"#).unwrap();
        assert!(config.validate().is_err());
        assert_eq!(config.scheme(), "https://");
    }
}
