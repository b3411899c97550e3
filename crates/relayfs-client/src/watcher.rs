//! Directory watchers on the remote side.
//!
//! Each watcher owns its own connection. After `CreateWatcher` the server
//! only pushes events on it; property changes go the other way as one-way
//! frames, written in call order.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use relayfs_core::fs::WATCH_CHANNEL_CAPACITY;
use relayfs_core::{FileWatcher, FsError, FsResult, NotifyFilters, WatchEvent, WatcherOptions};
use relayfs_protocol::messages::{decode_event, encode_watcher_options};
use relayfs_protocol::{Action, Frame, WatcherProperty};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::tls::Connector;

/// A watcher running on the server, republishing its pushes locally.
#[derive(Debug)]
pub struct RemoteWatcher {
    connection: Arc<Connection>,
    options: Mutex<WatcherOptions>,
    // Serialises setters so local options follow the order frames were sent.
    setting: tokio::sync::Mutex<()>,
    tx: broadcast::Sender<WatchEvent>,
    pump: JoinHandle<()>,
}

impl RemoteWatcher {
    /// Dial a dedicated connection and start a watcher with `options`.
    pub async fn create(
        connector: &dyn Connector,
        config: &ClientConfig,
        options: WatcherOptions,
    ) -> FsResult<Self> {
        let transport = tokio::time::timeout(config.connect_timeout(), connector.connect())
            .await
            .map_err(|_| FsError::TimedOut)??;
        let connection = Connection::establish(transport, config.secret.as_bytes(), config).await?;
        Self::start(Arc::new(connection), options).await
    }

    /// Start a watcher on an already established connection.
    pub async fn start(connection: Arc<Connection>, options: WatcherOptions) -> FsResult<Self> {
        let pushes = connection
            .take_pushes()
            .ok_or_else(|| FsError::other("connection already carries a watcher"))?;
        connection
            .request(Action::CreateWatcher, encode_watcher_options(&options)?)
            .await?;
        tracing::debug!(path = %options.path.display(), recursive = options.recursive, "remote watcher started");

        let (tx, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        let pump = tokio::spawn(pump(pushes, tx.clone()));
        Ok(Self {
            connection,
            options: Mutex::new(options),
            setting: tokio::sync::Mutex::new(()),
            tx,
            pump,
        })
    }

    async fn set(&self, property: WatcherProperty) -> FsResult<()> {
        let _order = self.setting.lock().await;
        self.connection
            .send_one_way(property.action(), property.encode()?)
            .await?;
        property.apply(&mut self.options.lock());
        Ok(())
    }
}

impl Drop for RemoteWatcher {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump(mut pushes: mpsc::UnboundedReceiver<Frame>, tx: broadcast::Sender<WatchEvent>) {
    while let Some(frame) = pushes.recv().await {
        match decode_event(frame.action, frame.payload) {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => {
                tracing::warn!(action = ?frame.action, error = %e, "skipping malformed watcher push");
            }
        }
    }
    tracing::debug!("remote watcher connection closed");
}

#[async_trait]
impl FileWatcher for RemoteWatcher {
    fn options(&self) -> WatcherOptions {
        self.options.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.tx.subscribe()
    }

    async fn set_path(&self, path: PathBuf) -> FsResult<()> {
        self.set(WatcherProperty::Path(path)).await
    }

    async fn set_enabled(&self, enabled: bool) -> FsResult<()> {
        self.set(WatcherProperty::Enabled(enabled)).await
    }

    async fn set_recursive(&self, recursive: bool) -> FsResult<()> {
        self.set(WatcherProperty::Recursive(recursive)).await
    }

    async fn set_filter(&self, filter: String) -> FsResult<()> {
        self.set(WatcherProperty::Filter(filter)).await
    }

    async fn set_notify_filter(&self, notify_filter: NotifyFilters) -> FsResult<()> {
        self.set(WatcherProperty::NotifyFilter(notify_filter)).await
    }
}
