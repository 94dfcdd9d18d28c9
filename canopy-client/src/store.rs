//! Durable local record of a tree's manifest.
//!
//! A [`LocalStateStore`] owns one backing file holding a whole [`Manifest`]
//! in MessagePack. Mutations only touch memory and set a dirty flag;
//! [`release`](LocalStateStore::release) writes the full manifest back in a
//! single encode, and only when something changed. The write is not
//! atomic: a failure part-way can leave a truncated file behind.

use std::path::{Path, PathBuf};

use canopy_types::{FileRecord, Manifest};
use tracing::debug;

use crate::error::StoreError;

/// A named, durable manifest with a dirty flag.
#[derive(Debug)]
pub struct LocalStateStore {
    path: PathBuf,
    manifest: Manifest,
    dirty: bool,
}

impl LocalStateStore {
    /// Load the store backed by `path`.
    ///
    /// A missing file yields an empty, clean store. Any other read failure
    /// or undecodable content is an error.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let manifest = match tokio::fs::read(&path).await {
            Ok(bytes) => Manifest::from_bytes(&bytes).map_err(|e| StoreError::Encoding {
                path: path.clone(),
                source: e,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state at {}, starting empty", path.display());
                Manifest::new()
            }
            Err(e) => return Err(StoreError::Io { path, source: e }),
        };
        Ok(Self {
            path,
            manifest,
            dirty: false,
        })
    }

    /// A fresh, empty store for `path`. It is dirty from the start, so
    /// releasing it always writes, replacing whatever was there.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            manifest: Manifest::new(),
            dirty: true,
        }
    }

    /// Insert or replace the record for `record.path`.
    pub fn add_file(&mut self, record: FileRecord) {
        self.manifest.insert(record);
        self.dirty = true;
    }

    /// Remove the record for `path`. Marks the store dirty even if no such
    /// record existed.
    pub fn remove_file(&mut self, path: &str) {
        self.manifest.remove(path);
        self.dirty = true;
    }

    /// Current content.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    /// True if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.manifest.is_empty()
    }

    /// True if `release` would write.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist if dirty and give up the store. Returns whether a write
    /// happened.
    pub async fn release(self) -> Result<bool, StoreError> {
        if !self.dirty {
            return Ok(false);
        }
        let bytes = self
            .manifest
            .to_bytes()
            .map_err(|e| StoreError::Encoding {
                path: self.path.clone(),
                source: e,
            })?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| StoreError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        debug!(
            "Wrote {} records to {}",
            self.manifest.len(),
            self.path.display()
        );
        Ok(true)
    }
}
