use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CertChatError, CertChatResult};
use crate::wire::DEFAULT_MAX_FRAME_BYTES;

/// Top-level daemon configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CertChatConfig {
    pub daemon: DaemonConfig,
    pub ca: CaConfig,
    pub chat: ChatConfig,
    pub wire: WireConfig,
}

impl CertChatConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> CertChatResult<Self> {
        toml::from_str(content).map_err(|e| CertChatError::Config(e.to_string()))
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> CertChatResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| CertChatError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9100)
    pub metrics_addr: Option<String>,
}

/// Certificate Authority service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaConfig {
    /// TCP listen address (default: 0.0.0.0:8100)
    pub listen: String,
    /// Issuer identity stamped on every signed certificate
    pub issuer: String,
    /// RSA modulus size for a freshly generated CA key
    pub key_bits: u32,
    /// PEM private key; loaded when present, written after generation otherwise
    pub key_file: Option<PathBuf>,
    /// Directory where clients deposit unsigned certificates for signing
    pub pending_dir: PathBuf,
}

/// Chat relay service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// TCP listen address (default: 0.0.0.0:9000)
    pub listen: String,
    /// Per-connection outbound queue depth
    pub outbound_queue: usize,
    /// PEM public key of the issuing CA; login certificates are checked
    /// against it when set. In `all` mode the in-process CA key is used.
    pub ca_public_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// Largest accepted frame in bytes
    pub max_frame_bytes: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
            metrics_addr: Some("127.0.0.1:9100".into()),
        }
    }
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8100".into(),
            issuer: "CA".into(),
            key_bits: 2048,
            key_file: None,
            pending_dir: PathBuf::from("/var/lib/certchat/pending"),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9000".into(),
            outbound_queue: 64,
            ca_public_key: None,
        }
    }
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}
