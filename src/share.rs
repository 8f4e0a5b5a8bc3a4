//! Share lifecycle for local files.
//!
//! [`ShareService`] owns the registry and the file server. Sharing a file
//! makes sure the server is listening before the file is registered, and
//! removing the last file shuts the server down again.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::network::{AddressResolver, InterfaceResolver};
use crate::registry::{FileId, FileListing, Registry, SharedFile, SharedRegistry};
use crate::server::{FileServer, ServerError, ServerState, DEFAULT_PORT};

/// Errors that can occur while sharing a file
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("Failed to start server: {0}")]
    Server(#[from] ServerError),

    #[error("Cannot share {}: {source}", .path.display())]
    Describe {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for share operations
pub type ShareResult<T> = Result<T, ShareError>;

/// A file picked by the user, as handed over by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FileDescriptor {
    /// Describe the regular file at `path`.
    ///
    /// The stored path is made absolute. Name and kind come from `path` as
    /// given, so a symlink is advertised under its own name. The kind is the
    /// extension with its leading dot, empty when there is none.
    pub fn from_path(path: &Path) -> ShareResult<Self> {
        let describe_error = |source: io::Error| ShareError::Describe {
            path: path.to_path_buf(),
            source,
        };

        let absolute = fs::canonicalize(path).map_err(describe_error)?;
        let metadata = fs::metadata(&absolute).map_err(describe_error)?;
        if !metadata.is_file() {
            return Err(describe_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        Ok(Self {
            path: absolute,
            name,
            size: metadata.len(),
            kind,
        })
    }
}

/// Where the UI gets files from.
pub trait FilePicker {
    /// Ask for a file. `Ok(None)` means the user cancelled.
    fn select_file(&mut self) -> ShareResult<Option<FileDescriptor>>;
}

/// Picker answering with a fixed list of paths, one per call.
///
/// Once the list is used up every call reports a cancellation.
#[derive(Debug, Default)]
pub struct PathPicker {
    queue: VecDeque<PathBuf>,
}

impl PathPicker {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            queue: paths.into_iter().collect(),
        }
    }
}

impl FilePicker for PathPicker {
    fn select_file(&mut self) -> ShareResult<Option<FileDescriptor>> {
        match self.queue.pop_front() {
            Some(path) => FileDescriptor::from_path(&path).map(Some),
            None => Ok(None),
        }
    }
}

/// Result of sharing a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareInfo {
    pub id: FileId,
    pub url: String,
    pub ip: String,
    pub port: u16,
}

/// Build the download URL for a shared file.
pub fn share_url(host: &str, port: u16, id: &FileId) -> String {
    format!("http://{}:{}/file/{}", host, port, id)
}

/// Service for sharing files over the local network
///
/// The ShareService is responsible for:
/// - Registering and unregistering files
/// - Starting the server on the first share
/// - Stopping the server when the last file is removed
/// - Building the URL handed out to other devices
pub struct ShareService {
    registry: SharedRegistry,
    server: FileServer,
    resolver: Box<dyn AddressResolver>,
    preferred_port: u16,
    /// Serializes share and unshare so server start/stop follows the registry.
    lifecycle: Mutex<()>,
}

impl Default for ShareService {
    fn default() -> Self {
        Self::new(DEFAULT_PORT)
    }
}

impl ShareService {
    /// Create a service that advertises the machine's LAN address.
    pub fn new(preferred_port: u16) -> Self {
        Self::with_resolver(preferred_port, Box::new(InterfaceResolver))
    }

    /// Create a service with a custom address resolver.
    pub fn with_resolver(preferred_port: u16, resolver: Box<dyn AddressResolver>) -> Self {
        let registry = Registry::new().into_shared();
        Self {
            server: FileServer::new(registry.clone()),
            registry,
            resolver,
            preferred_port,
            lifecycle: Mutex::new(()),
        }
    }

    /// Share a file and return where it can be downloaded.
    ///
    /// The server is started before the file is registered, so a failed
    /// start leaves the registry untouched.
    pub async fn share(&self, file: FileDescriptor) -> ShareResult<ShareInfo> {
        let _guard = self.lifecycle.lock().await;

        info!(name = %file.name, path = %file.path.display(), size = file.size, "Sharing file");

        let port = self.server.ensure_started(self.preferred_port).await?;

        let id = {
            let mut registry = self.registry.write().await;
            registry.put(SharedFile {
                source_path: file.path,
                display_name: file.name,
                size_bytes: file.size,
                media_kind: file.kind,
            })
        };

        let ip = self.resolver.resolve();
        let url = share_url(&ip, port, &id);

        info!(id = %id, url = %url, "File shared");
        Ok(ShareInfo { id, url, ip, port })
    }

    /// Stop sharing a file.
    ///
    /// Returns whether the id was shared. Unknown ids are ignored. When the
    /// registry becomes empty the server is stopped.
    pub async fn unshare(&self, id: &FileId) -> bool {
        let _guard = self.lifecycle.lock().await;

        let (removed, now_empty) = {
            let mut registry = self.registry.write().await;
            let removed = registry.remove(id);
            (removed, registry.is_empty())
        };

        if removed {
            info!(id = %id, "File unshared");
        } else {
            debug!(id = %id, "Unshare requested for unknown file");
        }

        if now_empty && self.server.state() != ServerState::Stopped {
            info!("No files left to share, stopping server");
            self.server.stop().await;
        }

        removed
    }

    /// Stop the server regardless of what is still shared.
    ///
    /// Meant to run when the application exits.
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        info!("Shutting down share service");
        self.server.stop().await;
    }

    /// All shared files in the order they were shared.
    pub async fn list(&self) -> Vec<FileListing> {
        self.registry.read().await.list()
    }

    /// Look up a shared file.
    pub async fn get(&self, id: &FileId) -> Option<SharedFile> {
        self.registry.read().await.get(id).cloned()
    }

    /// Current server state.
    pub fn server_state(&self) -> ServerState {
        self.server.state()
    }

    /// Watch server state changes.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.server.subscribe()
    }

    /// Port tried first when the server starts.
    pub fn preferred_port(&self) -> u16 {
        self.preferred_port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::StaticResolver;
    use tempfile::TempDir;

    fn create_test_service() -> ShareService {
        ShareService::with_resolver(0, Box::new(StaticResolver("192.168.1.50".to_string())))
    }

    fn write_file(dir: &TempDir, name: &str, len: usize) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, vec![b'x'; len]).unwrap();
        path
    }

    #[test]
    fn test_file_descriptor_from_path() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "holiday.jpg", 321);

        let desc = FileDescriptor::from_path(&path).unwrap();
        assert_eq!(desc.name, "holiday.jpg");
        assert_eq!(desc.size, 321);
        assert_eq!(desc.kind, ".jpg");
        assert!(desc.path.is_absolute());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_descriptor_keeps_symlink_name() {
        let dir = TempDir::new().unwrap();
        let target = write_file(&dir, "target.pdf", 12);
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let desc = FileDescriptor::from_path(&link).unwrap();
        assert_eq!(desc.name, "link.txt");
        assert_eq!(desc.kind, ".txt");
        assert_eq!(desc.size, 12);
        assert_eq!(desc.path, fs::canonicalize(&target).unwrap());
    }

    #[test]
    fn test_file_descriptor_without_extension() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "README", 1);

        let desc = FileDescriptor::from_path(&path).unwrap();
        assert_eq!(desc.kind, "");
    }

    #[test]
    fn test_file_descriptor_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = FileDescriptor::from_path(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, ShareError::Describe { .. }));
        assert!(err.to_string().contains("nope.txt"));
    }

    #[test]
    fn test_file_descriptor_rejects_directory() {
        let dir = TempDir::new().unwrap();
        let err = FileDescriptor::from_path(dir.path()).unwrap_err();
        assert!(matches!(err, ShareError::Describe { .. }));
    }

    #[test]
    fn test_path_picker_cancels_when_exhausted() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "one.txt", 3);

        let mut picker = PathPicker::new(vec![path]);
        assert!(picker.select_file().unwrap().is_some());
        assert!(picker.select_file().unwrap().is_none());
    }

    #[test]
    fn test_share_url_format() {
        let id = FileId::from("1700000000000abcde");
        assert_eq!(
            share_url("10.0.0.2", 50001, &id),
            "http://10.0.0.2:50001/file/1700000000000abcde"
        );
    }

    #[test]
    fn test_file_descriptor_json_shape() {
        let desc = FileDescriptor {
            path: PathBuf::from("/tmp/a.txt"),
            name: "a.txt".to_string(),
            size: 3,
            kind: ".txt".to_string(),
        };
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], ".txt");
        assert_eq!(json["size"], 3);
    }

    #[tokio::test]
    async fn test_share_starts_server_and_builds_url() {
        let dir = TempDir::new().unwrap();
        let desc = FileDescriptor::from_path(&write_file(&dir, "a.txt", 10)).unwrap();
        let service = create_test_service();

        let info = service.share(desc).await.unwrap();
        assert_eq!(info.ip, "192.168.1.50");
        assert_eq!(
            info.url,
            format!("http://192.168.1.50:{}/file/{}", info.port, info.id)
        );
        assert_eq!(service.server_state(), ServerState::Running(info.port));

        let stored = service.get(&info.id).await.unwrap();
        assert_eq!(stored.display_name, "a.txt");
        assert_eq!(stored.size_bytes, 10);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_share_reuses_port() {
        let dir = TempDir::new().unwrap();
        let service = create_test_service();

        let a = service
            .share(FileDescriptor::from_path(&write_file(&dir, "a.txt", 1)).unwrap())
            .await
            .unwrap();
        let b = service
            .share(FileDescriptor::from_path(&write_file(&dir, "b.txt", 2)).unwrap())
            .await
            .unwrap();

        assert_eq!(a.port, b.port);
        assert_ne!(a.id, b.id);
        assert_eq!(service.list().await.len(), 2);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_unshare_last_file_stops_server() {
        let dir = TempDir::new().unwrap();
        let service = create_test_service();

        let a = service
            .share(FileDescriptor::from_path(&write_file(&dir, "a.txt", 1)).unwrap())
            .await
            .unwrap();
        let b = service
            .share(FileDescriptor::from_path(&write_file(&dir, "b.txt", 1)).unwrap())
            .await
            .unwrap();

        assert!(service.unshare(&a.id).await);
        assert!(service.server_state().is_running());

        assert!(service.unshare(&b.id).await);
        assert_eq!(service.server_state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_unshare_unknown_id_is_noop() {
        let service = create_test_service();
        assert!(!service.unshare(&FileId::from("missing")).await);
        assert_eq!(service.server_state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_registry_empty() {
        // With the last port taken there is nowhere left to retry.
        let Ok(_blocker) = std::net::TcpListener::bind(("0.0.0.0", u16::MAX)) else {
            return;
        };

        let dir = TempDir::new().unwrap();
        let service = ShareService::with_resolver(
            u16::MAX,
            Box::new(StaticResolver("10.0.0.1".to_string())),
        );

        let result = service
            .share(FileDescriptor::from_path(&write_file(&dir, "a.txt", 1)).unwrap())
            .await;

        assert!(matches!(
            result,
            Err(ShareError::Server(ServerError::PortsExhausted { .. }))
        ));
        assert!(service.list().await.is_empty());
        assert_eq!(service.server_state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_stops_server_with_files_shared() {
        let dir = TempDir::new().unwrap();
        let service = create_test_service();

        service
            .share(FileDescriptor::from_path(&write_file(&dir, "a.txt", 1)).unwrap())
            .await
            .unwrap();

        service.shutdown().await;
        assert_eq!(service.server_state(), ServerState::Stopped);
        assert_eq!(service.list().await.len(), 1);
    }

    #[test]
    fn test_share_error_display() {
        let err = ShareError::Server(ServerError::PortsExhausted { start: 65000 });
        assert!(err.to_string().contains("Failed to start server"));
        assert!(err.to_string().contains("65000"));
    }
}
