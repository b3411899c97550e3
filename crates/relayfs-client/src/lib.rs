//! Remote file system client.
//!
//! A [`RemoteFileSystem`] talks to a `relayfs-server` over one
//! authenticated connection and opens one more per watcher. Responses are
//! matched to requests by id, so any number of callers can share it.

pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod remote_fs;
pub mod tls;
pub mod watcher;

pub use config::ClientConfig;
pub use connection::{Connection, Transport};
pub use error::ConnectError;
pub use remote_fs::RemoteFileSystem;
pub use tls::{Connector, TlsConnector};
pub use watcher::RemoteWatcher;

use std::sync::Arc;

/// Connect over TLS using the settings in `config`.
pub async fn connect_tls(config: ClientConfig) -> Result<RemoteFileSystem, ConnectError> {
    let connector = Arc::new(TlsConnector::from_config(&config)?);
    RemoteFileSystem::connect(connector, config).await
}
