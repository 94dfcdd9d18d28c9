//! Directory scanning.
//!
//! A [`Scanner`] walks one mount in lexical order without following
//! symlinks and describes every regular file and symlink it meets as a
//! [`FileRecord`]. Directories contribute no records of their own; pipes,
//! sockets and device nodes are skipped. [`write_manifest`] serializes the
//! walk as newline-delimited JSON.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, UNIX_EPOCH};

use canopy_core::file_hash;
use canopy_types::{encode_record, FileRecord, WireError};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::Mount;

/// Lazy walker over one directory tree.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    checksum: bool,
}

impl Scanner {
    /// Scan `root`, hashing file content if `checksum` is set.
    pub fn new(root: impl Into<PathBuf>, checksum: bool) -> Self {
        Self {
            root: root.into(),
            checksum,
        }
    }

    /// Scanner configured from a mount.
    pub fn for_mount(mount: &Mount) -> Self {
        Self::new(mount.root.clone(), mount.checksum)
    }

    /// Records for the tree, produced as the walk proceeds.
    ///
    /// Entries that cannot be read are logged and skipped. A file whose
    /// content cannot be hashed is still reported, with hash 0.
    pub fn records(&self) -> impl Iterator<Item = FileRecord> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) => self.describe(&entry),
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", self.root.display(), e);
                    None
                }
            })
    }

    fn describe(&self, entry: &DirEntry) -> Option<FileRecord> {
        let file_type = entry.file_type();
        if file_type.is_dir() {
            return None;
        }
        let path = relative_path(&self.root, entry.path())?;

        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Cannot stat {}: {}", entry.path().display(), e);
                return None;
            }
        };
        let size = meta.len() as i64;
        let mode = mode_bits(&meta);
        let mtime = mtime_secs(&meta);

        if file_type.is_symlink() {
            return match std::fs::read_link(entry.path()) {
                Ok(target) => Some(FileRecord::symlink(
                    path,
                    target.to_string_lossy(),
                    size,
                    mode,
                    mtime,
                )),
                Err(e) => {
                    warn!("Cannot read link {}: {}", entry.path().display(), e);
                    None
                }
            };
        }

        if !file_type.is_file() {
            debug!("Ignoring special file {}", entry.path().display());
            return None;
        }

        let hash = if self.checksum {
            file_hash(entry.path()).unwrap_or_else(|e| {
                warn!("Cannot hash {}: {}", entry.path().display(), e);
                0
            })
        } else {
            0
        };
        Some(FileRecord::regular(path, size, mode, mtime, hash))
    }
}

/// `/`-separated path of `full` relative to `root`.
fn relative_path(root: &Path, full: &Path) -> Option<String> {
    let rel = full.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(unix)]
fn mode_bits(meta: &std::fs::Metadata) -> i32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode() as i32
}

#[cfg(not(unix))]
fn mode_bits(meta: &std::fs::Metadata) -> i32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

fn mtime_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Write `records` as newline-delimited JSON, flushing `out` whenever
/// `flush_interval` has elapsed since the last flush and once at the end.
///
/// Stops at the first write failure. Returns the number of records written.
pub fn write_manifest<I, W>(
    records: I,
    out: &mut W,
    flush_interval: Duration,
) -> Result<usize, WireError>
where
    I: IntoIterator<Item = FileRecord>,
    W: Write,
{
    let mut last_flush = Instant::now();
    let mut count = 0;
    for record in records {
        encode_record(out, &record)?;
        count += 1;
        if last_flush.elapsed() >= flush_interval {
            out.flush()?;
            last_flush = Instant::now();
        }
    }
    out.flush()?;
    Ok(count)
}
