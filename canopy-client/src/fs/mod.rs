//! Local filesystem capability.
//!
//! [`RemoteClient`](crate::RemoteClient) never touches the filesystem
//! directly for downloads and uploads; it goes through a [`LocalFs`], so
//! tests can substitute [`MockFs`] and script failures.
//!
//! # Example
//!
//! ```ignore
//! let fs = MockFs::new();
//! fs.fail_next_create(io::ErrorKind::NotFound);
//! let client = RemoteClient::with_fs(Arc::new(fs.clone()));
//! ```

mod mock;

pub use mock::MockFs;

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Writable handle returned by [`LocalFs::create`].
pub type FileWriter = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// Readable handle returned by [`LocalFs::open`].
pub type FileReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// The filesystem operations the transfer client needs.
#[async_trait]
pub trait LocalFs: Send + Sync {
    /// Create or truncate `path` for writing. Parent directories are not
    /// created.
    async fn create(&self, path: &Path) -> io::Result<FileWriter>;

    /// Open `path` for reading.
    async fn open(&self, path: &Path) -> io::Result<FileReader>;

    /// Create `path` and any missing ancestors.
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem, via `tokio::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

#[async_trait]
impl LocalFs for OsFs {
    async fn create(&self, path: &Path) -> io::Result<FileWriter> {
        Ok(Box::new(tokio::fs::File::create(path).await?))
    }

    async fn open(&self, path: &Path) -> io::Result<FileReader> {
        Ok(Box::new(tokio::fs::File::open(path).await?))
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }
}
