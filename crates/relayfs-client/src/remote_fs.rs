//! [`FileSystem`] over a server connection. Read and observe only.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use relayfs_core::{
    EntryKind, FileStream, FileSystem, FileWatcher, FsError, FsResult, MemoryFile, OpenOptions,
    PathRules, SearchOption, WatcherOptions,
};
use relayfs_protocol::messages::{decode_bool, decode_paths, decode_time, encode_path};
use relayfs_protocol::{Action, EnumerateRequest, OpenRequest, SessionState};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::ConnectError;
use crate::tls::Connector;
use crate::watcher::RemoteWatcher;

/// A file system on another machine.
///
/// Path syntax is fetched once at connect time and all path arithmetic
/// happens locally against it. Mutations fail with
/// [`FsError::NotSupported`].
pub struct RemoteFileSystem {
    connection: Connection,
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    session: SessionState,
}

impl fmt::Debug for RemoteFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFileSystem")
            .field("address", &self.config.address)
            .field("session", &self.session)
            .field("connection", &self.connection)
            .finish()
    }
}

impl RemoteFileSystem {
    /// Dial, authenticate and fetch the session state.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        config: ClientConfig,
    ) -> Result<Self, ConnectError> {
        let transport = tokio::time::timeout(config.connect_timeout(), connector.connect())
            .await
            .map_err(|_| ConnectError::Timeout)??;
        let connection = Connection::establish(transport, config.secret.as_bytes(), &config).await?;

        let payload = connection
            .request(Action::GetSessionState, Default::default())
            .await?;
        let session = SessionState::decode(payload)?;
        tracing::info!(
            separator = %session.rules.separator,
            cwd = %session.current_directory.display(),
            "remote session ready"
        );

        Ok(Self {
            connection,
            connector,
            config,
            session,
        })
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Close the session connection. Pending and later calls fail with
    /// [`FsError::Disconnected`]; watchers keep their own connections.
    pub async fn close(&self) {
        self.connection.close().await;
    }

    async fn query_bool(&self, action: Action, path: &Path) -> FsResult<bool> {
        let payload = self.connection.request(action, encode_path(path)?).await?;
        Ok(decode_bool(payload)?)
    }

    async fn query_time(&self, action: Action, path: &Path) -> FsResult<SystemTime> {
        let payload = self.connection.request(action, encode_path(path)?).await?;
        Ok(decode_time(payload)?)
    }

    fn read_only(operation: &str, path: &Path) -> FsError {
        FsError::not_supported(format!("{operation}({}) on a remote file system", path.display()))
    }
}

#[async_trait]
impl FileSystem for RemoteFileSystem {
    fn path_rules(&self) -> PathRules {
        self.session.rules
    }

    fn current_directory(&self) -> PathBuf {
        self.session.current_directory.clone()
    }

    async fn file_exists(&self, path: &Path) -> FsResult<bool> {
        self.query_bool(Action::FileExists, path).await
    }

    async fn directory_exists(&self, path: &Path) -> FsResult<bool> {
        self.query_bool(Action::DirectoryExists, path).await
    }

    async fn open(&self, path: &Path, options: OpenOptions) -> FsResult<Box<dyn FileStream>> {
        if options.is_mutating() {
            return Err(Self::read_only("open for writing", path));
        }
        let request = OpenRequest {
            path: path.to_path_buf(),
            options,
        };
        let bytes = self
            .connection
            .request(Action::OpenRead, request.encode()?)
            .await?;
        tracing::trace!(path = %path.display(), len = bytes.len(), "remote read");
        Ok(Box::new(MemoryFile::new(bytes)))
    }

    async fn enumerate(
        &self,
        path: &Path,
        pattern: &str,
        search: SearchOption,
        kind: EntryKind,
    ) -> FsResult<Vec<PathBuf>> {
        let request = EnumerateRequest {
            path: path.to_path_buf(),
            pattern: pattern.to_string(),
            search,
            kind,
        };
        let payload = self
            .connection
            .request(Action::Enumerate, request.encode()?)
            .await?;
        Ok(decode_paths(payload)?)
    }

    async fn last_write_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.query_time(Action::GetLastWriteTime, path).await
    }

    async fn creation_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.query_time(Action::GetCreationTime, path).await
    }

    async fn last_access_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.query_time(Action::GetLastAccessTime, path).await
    }

    async fn set_last_write_time(&self, path: &Path, _time: SystemTime) -> FsResult<()> {
        Err(Self::read_only("set_last_write_time", path))
    }

    async fn set_last_access_time(&self, path: &Path, _time: SystemTime) -> FsResult<()> {
        Err(Self::read_only("set_last_access_time", path))
    }

    async fn create_directory(&self, path: &Path) -> FsResult<()> {
        Err(Self::read_only("create_directory", path))
    }

    async fn delete_file(&self, path: &Path) -> FsResult<()> {
        Err(Self::read_only("delete_file", path))
    }

    async fn delete_directory(&self, path: &Path, _recursive: bool) -> FsResult<()> {
        Err(Self::read_only("delete_directory", path))
    }

    async fn move_file(&self, from: &Path, _to: &Path) -> FsResult<()> {
        Err(Self::read_only("move_file", from))
    }

    async fn create_watcher(&self, options: WatcherOptions) -> FsResult<Box<dyn FileWatcher>> {
        let watcher = RemoteWatcher::create(self.connector.as_ref(), &self.config, options).await?;
        Ok(Box::new(watcher))
    }
}
