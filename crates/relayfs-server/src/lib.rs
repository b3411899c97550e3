//! Serving side of the relayfs protocol.
//!
//! A [`Server`] answers requests from any [`FileSystem`] backend. [`run`]
//! puts one behind a TLS listener; tests drive
//! [`Server::serve_connection`] over in-memory streams instead.

pub mod config;
pub mod constants;
pub mod error;
pub mod handler;
mod session;
pub mod tls;

use std::fmt;
use std::sync::Arc;

use relayfs_core::{FileSystem, LocalFileSystem};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

pub use config::ServerConfig;
pub use error::ServerError;

/// Serves one backend to any number of connections.
#[derive(Clone)]
pub struct Server {
    backend: Arc<dyn FileSystem>,
    secret: Arc<[u8]>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server").field("backend", &self.backend).finish_non_exhaustive()
    }
}

impl Server {
    pub fn new(backend: Arc<dyn FileSystem>, secret: impl AsRef<[u8]>) -> Self {
        Self {
            backend,
            secret: Arc::from(secret.as_ref()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn FileSystem> {
        &self.backend
    }

    /// Run one connection to completion: handshake, requests, and the
    /// watcher push channel if the client asks for one.
    pub async fn serve_connection<T>(&self, io: T) -> Result<(), ServerError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        session::serve(self.backend.clone(), self.secret.clone(), io).await
    }
}

/// Serve the local file system over TLS until the listener fails.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let backend = LocalFileSystem::new();
    if let Some(root) = &config.root {
        backend.set_current_directory(root)?;
    }
    if config.secret.is_empty() {
        tracing::warn!("handshake secret is empty");
    }
    let server = Server::new(Arc::new(backend), config.secret.as_bytes());
    let acceptor = tls::load_acceptor(&config)?;

    let listener = TcpListener::bind(&config.bind).await?;
    tracing::info!(bind = %listener.local_addr()?, "listening");

    loop {
        let (tcp, peer) = listener.accept().await?;
        let server = server.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            if let Err(e) = tcp.set_nodelay(true) {
                tracing::debug!(%peer, error = %e, "set_nodelay failed");
            }
            let tls = match acceptor.accept(tcp).await {
                Ok(tls) => tls,
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "TLS accept failed");
                    return;
                }
            };
            tracing::debug!(%peer, "connection accepted");
            match server.serve_connection(tls).await {
                Ok(()) => tracing::debug!(%peer, "connection closed"),
                Err(e) => tracing::warn!(%peer, error = %e, "connection ended with error"),
            }
        });
    }
}
