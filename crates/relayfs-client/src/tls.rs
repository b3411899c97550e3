//! Opening transports: the [`Connector`] seam and its TLS implementation.

use std::fmt;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::{ClientConfig as RustlsConfig, RootCertStore};
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;

use crate::config::ClientConfig;
use crate::connection::Transport;
use crate::error::ConnectError;

/// Opens a fresh transport to the server.
///
/// A remote file system dials once for its session and once more for
/// every watcher it creates.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(&self) -> Result<Box<dyn Transport>, ConnectError>;
}

/// TCP + TLS, verifying the server against a configured CA bundle.
pub struct TlsConnector {
    address: String,
    server_name: ServerName<'static>,
    inner: tokio_rustls::TlsConnector,
}

impl fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnector")
            .field("address", &self.address)
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl TlsConnector {
    /// Build from `config`. A CA file is required; no platform roots are
    /// consulted.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConnectError> {
        let ca_file = config
            .ca_file
            .as_deref()
            .ok_or_else(|| ConnectError::Config("ca_file is required for TLS".into()))?;
        let roots = load_roots(ca_file)?;

        let tls = RustlsConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let server_name = ServerName::try_from(config.server_name.clone())
            .map_err(|_| ConnectError::ServerName(config.server_name.clone()))?;

        Ok(Self {
            address: config.address.clone(),
            server_name,
            inner: tokio_rustls::TlsConnector::from(Arc::new(tls)),
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ConnectError> {
        let tcp = TcpStream::connect(&self.address).await?;
        tcp.set_nodelay(true)?;
        let tls = self
            .inner
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| ConnectError::Tls(e.to_string()))?;
        tracing::debug!(address = %self.address, "TLS session established");
        Ok(Box::new(tls))
    }
}

/// Trusted roots from a PEM bundle.
pub fn load_roots(path: &Path) -> Result<RootCertStore, ConnectError> {
    let pem = std::fs::read(path)?;
    let mut reader = BufReader::new(&pem[..]);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnectError::Tls(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ConnectError::Tls(format!(
            "{}: no certificates found",
            path.display()
        )));
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if ignored > 0 {
        tracing::warn!(path = %path.display(), ignored, "skipped unparsable CA certificates");
    }
    if added == 0 {
        return Err(ConnectError::Tls(format!(
            "{}: no usable certificates",
            path.display()
        )));
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_ca_file_is_config_error() {
        let err = TlsConnector::from_config(&ClientConfig::default()).unwrap_err();
        assert!(matches!(err, ConnectError::Config(_)));
    }

    #[test]
    fn test_empty_bundle_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();
        let err = load_roots(file.path()).unwrap_err();
        assert!(matches!(err, ConnectError::Tls(_)));
    }
}
