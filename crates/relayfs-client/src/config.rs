//! Client configuration, loadable from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{CONNECT_TIMEOUT, DEFAULT_PORT, REQUEST_TIMEOUT};
use crate::error::ConnectError;

/// Where and how to reach a server. Durations are milliseconds on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` to dial.
    pub address: String,
    /// Name the server certificate must carry.
    pub server_name: String,
    /// Shared handshake secret.
    pub secret: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// PEM bundle of trusted roots for the server certificate.
    pub ca_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("localhost:{DEFAULT_PORT}"),
            server_name: "localhost".to_string(),
            secret: String::new(),
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            request_timeout_ms: REQUEST_TIMEOUT.as_millis() as u64,
            ca_file: None,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn from_toml(text: &str) -> Result<Self, ConnectError> {
        toml::from_str(text).map_err(|e| ConnectError::Config(e.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self, ConnectError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&text)
    }
}
