//! Mock filesystem for testing.
//!
//! Serves queued file contents, captures written bytes and lets tests
//! force the next create/open/mkdir to fail.

use super::{FileReader, FileWriter, LocalFs};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// In-memory [`LocalFs`] with scripted failures.
///
/// Clones share state, so a test can keep one handle while the client owns
/// another.
#[derive(Debug, Default, Clone)]
pub struct MockFs {
    inner: Arc<Mutex<MockFsInner>>,
}

#[derive(Debug, Default)]
struct MockFsInner {
    files: BTreeMap<PathBuf, Vec<u8>>,
    written: BTreeMap<PathBuf, Arc<Mutex<Vec<u8>>>>,
    dirs: Vec<PathBuf>,
    fail_create: VecDeque<io::ErrorKind>,
    fail_open: VecDeque<io::ErrorKind>,
    fail_mkdir: VecDeque<io::ErrorKind>,
}

impl MockFs {
    /// Create an empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `content` readable at `path`.
    pub fn add_file(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        let mut inner = self.inner.lock().unwrap();
        inner.files.insert(path.into(), content.into());
    }

    /// Bytes written to `path` so far, if it was ever created.
    pub fn written(&self, path: &Path) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .written
            .get(path)
            .map(|buf| buf.lock().unwrap().clone())
    }

    /// Directories passed to `create_dir_all`, in call order.
    pub fn created_dirs(&self) -> Vec<PathBuf> {
        let inner = self.inner.lock().unwrap();
        inner.dirs.clone()
    }

    /// Cause the next create() to fail. Calls queue up.
    pub fn fail_next_create(&self, kind: io::ErrorKind) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_create.push_back(kind);
    }

    /// Cause the next open() to fail. Calls queue up.
    pub fn fail_next_open(&self, kind: io::ErrorKind) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_open.push_back(kind);
    }

    /// Cause the next create_dir_all() to fail. Calls queue up.
    pub fn fail_next_mkdir(&self, kind: io::ErrorKind) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_mkdir.push_back(kind);
    }
}

fn forced(kind: io::ErrorKind) -> io::Error {
    io::Error::new(kind, "forced by MockFs")
}

#[async_trait]
impl LocalFs for MockFs {
    async fn create(&self, path: &Path) -> io::Result<FileWriter> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(kind) = inner.fail_create.pop_front() {
            return Err(forced(kind));
        }

        let buf = Arc::new(Mutex::new(Vec::new()));
        inner.written.insert(path.to_path_buf(), Arc::clone(&buf));
        Ok(Box::new(CaptureWriter { buf }))
    }

    async fn open(&self, path: &Path) -> io::Result<FileReader> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(kind) = inner.fail_open.pop_front() {
            return Err(forced(kind));
        }

        match inner.files.get(path) {
            Some(content) => Ok(Box::new(io::Cursor::new(content.clone()))),
            None => Err(forced(io::ErrorKind::NotFound)),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(kind) = inner.fail_mkdir.pop_front() {
            return Err(forced(kind));
        }

        inner.dirs.push(path.to_path_buf());
        Ok(())
    }
}

/// Writer that appends into a shared buffer.
struct CaptureWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for CaptureWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
