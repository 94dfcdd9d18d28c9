//! Per-file manifest entries.

use serde::{Deserialize, Serialize};

/// Metadata and content fingerprint for one file or symlink in a tree.
///
/// Only `(size, hash, link_target)` take part in change detection; `mode`
/// and `mtime` are carried along for information and never cause a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRecord {
    /// Path relative to the tree root, `/`-separated. Unique within a manifest.
    #[serde(rename = "name", skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Size in bytes.
    pub size: i64,
    /// Raw permission and file type bits.
    pub mode: i32,
    /// Modification time, seconds since the unix epoch.
    pub mtime: i64,
    /// 64-bit content fingerprint, `0` when not computed.
    #[serde(skip_serializing_if = "is_zero")]
    pub hash: u64,
    /// Symlink target. Non-empty iff the entry is a symlink.
    #[serde(rename = "linkdest", skip_serializing_if = "String::is_empty")]
    pub link_target: String,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl FileRecord {
    /// Record for a regular file.
    pub fn regular(path: impl Into<String>, size: i64, mode: i32, mtime: i64, hash: u64) -> Self {
        Self {
            path: path.into(),
            size,
            mode,
            mtime,
            hash,
            link_target: String::new(),
        }
    }

    /// Record for a symlink. Symlinks never carry a content hash.
    pub fn symlink(
        path: impl Into<String>,
        target: impl Into<String>,
        size: i64,
        mode: i32,
        mtime: i64,
    ) -> Self {
        Self {
            path: path.into(),
            size,
            mode,
            mtime,
            hash: 0,
            link_target: target.into(),
        }
    }

    /// Whether this entry describes a symlink.
    pub fn is_symlink(&self) -> bool {
        !self.link_target.is_empty()
    }

    /// Content equivalence: same size, hash and link target.
    pub fn same_content(&self, other: &FileRecord) -> bool {
        self.size == other.size && self.hash == other.hash && self.link_target == other.link_target
    }
}
