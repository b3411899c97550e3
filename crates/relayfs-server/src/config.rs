//! Server configuration, loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_BIND_ADDRESS;
use crate::error::ServerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// Directory relative request paths resolve against.
    pub root: Option<PathBuf>,
    /// Shared handshake secret.
    pub secret: String,
    /// PEM certificate chain.
    pub cert_file: PathBuf,
    /// PEM private key.
    pub key_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND_ADDRESS.to_string(),
            root: None,
            secret: String::new(),
            cert_file: PathBuf::from("certs/cert.pem"),
            key_file: PathBuf::from("certs/key.pem"),
        }
    }
}

impl ServerConfig {
    pub fn from_toml(text: &str) -> Result<Self, ServerError> {
        toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self, ServerError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_gaps() {
        let config = ServerConfig::from_toml(
            r#"
            secret = "s3cret"
            root = "/srv/proj"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.root, Some(PathBuf::from("/srv/proj")));
        assert_eq!(config.cert_file, PathBuf::from("certs/cert.pem"));
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        assert!(matches!(
            ServerConfig::from_toml("bind = 7457"),
            Err(ServerError::Config(_))
        ));
    }
}
