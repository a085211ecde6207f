//! ==============================================================================
//! backend.rs - durable homes for the state snapshot
//! ==============================================================================
//!
//! purpose:
//!     a backend only moves opaque bytes. decoding (and telling "corrupt"
//!     apart from "absent") happens in watermark/mod.rs.
//!
//!     - FileBackend: one json file, replaced via write-temp-then-rename
//!     - RedisBackend: one redis string key
//!
//!     the backend is picked from `[state] backend = ...` in the config.
//!
//! ==============================================================================

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::{SyncError, SyncResult};

#[async_trait]
pub trait StateBackend: Send + Sync {
    /// the stored snapshot, or None if nothing has been saved yet
    async fn load(&self) -> SyncResult<Option<Vec<u8>>>;

    /// overwrite the stored snapshot
    async fn save(&self, payload: &[u8]) -> SyncResult<()>;

    /// human readable location, for logs
    fn describe(&self) -> String;
}

// ==============================================================================
// file
// ==============================================================================

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn load(&self) -> SyncResult<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::Storage(format!("reading {}: {e}", self.path.display()))),
        }
    }

    async fn save(&self, payload: &[u8]) -> SyncResult<()> {
        let tmp = self.temp_path();
        let storage_err = |what: &str, e: std::io::Error| {
            SyncError::Storage(format!("{what} {}: {e}", tmp.display()))
        };

        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|e| storage_err("writing", e))?;

        // the snapshot carries the access token
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| storage_err("restricting", e))?;
        }

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_err("renaming", e))
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

// ==============================================================================
// redis
// ==============================================================================

pub struct RedisBackend {
    client: redis::Client,
    addr: String,
    key: String,
}

impl RedisBackend {
    pub fn new(host: &str, port: u16, key: &str) -> SyncResult<Self> {
        let addr = format!("redis://{host}:{port}/");
        let client = redis::Client::open(addr.as_str())
            .map_err(|e| SyncError::Storage(format!("redis address {addr}: {e}")))?;
        Ok(Self { client, addr, key: key.to_string() })
    }

    async fn connection(&self) -> SyncResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SyncError::Storage(format!("connecting to {}: {e}", self.addr)))
    }
}

#[async_trait]
impl StateBackend for RedisBackend {
    async fn load(&self) -> SyncResult<Option<Vec<u8>>> {
        let mut con = self.connection().await?;
        con.get::<_, Option<Vec<u8>>>(&self.key)
            .await
            .map_err(|e| SyncError::Storage(format!("GET {}: {e}", self.key)))
    }

    async fn save(&self, payload: &[u8]) -> SyncResult<()> {
        let mut con = self.connection().await?;
        con.set::<_, _, ()>(&self.key, payload)
            .await
            .map_err(|e| SyncError::Storage(format!("SET {}: {e}", self.key)))
    }

    fn describe(&self) -> String {
        format!("{}{}", self.addr, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("state.json"));
        assert!(backend.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("state.json"));

        backend.save(b"{\"a\":1}").await.unwrap();
        backend.save(b"{\"a\":2}").await.unwrap();

        assert_eq!(backend.load().await.unwrap().as_deref(), Some(&b"{\"a\":2}"[..]));
        assert!(!backend.temp_path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("state.json"));
        backend.save(b"{}").await.unwrap();

        let mode = std::fs::metadata(&backend.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_file_unwritable_dir_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("missing").join("state.json"));
        assert!(matches!(backend.save(b"{}").await, Err(SyncError::Storage(_))));
    }

    #[test]
    fn test_redis_describe() {
        let backend = RedisBackend::new("localhost", 6379, "tag-sync").unwrap();
        assert_eq!(backend.describe(), "redis://localhost:6379/tag-sync");
    }
}
