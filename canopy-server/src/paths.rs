//! Mapping request paths onto a mount root.
//!
//! Resolution is purely lexical and happens before any filesystem access:
//! `..` components are folded against the components seen so far, and any
//! path that would climb above the root (or name the root itself) is
//! rejected. Symlinks inside the tree are not consulted.

use std::path::{Component, Path, PathBuf};

use crate::error::FileError;

/// Resolve `subpath` (URL-decoded, relative to the mount) under `root`.
///
/// The result is always strictly below `root` by whole components, so a
/// sibling such as `/srv/database` never passes for `/srv/data`.
pub fn resolve(root: &Path, subpath: &str) -> Result<PathBuf, FileError> {
    let mut parts = Vec::new();
    for component in Path::new(subpath).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(FileError::EscapesRoot(subpath.to_string()));
                }
            }
            Component::Prefix(_) => return Err(FileError::EscapesRoot(subpath.to_string())),
        }
    }
    if parts.is_empty() {
        return Err(FileError::EscapesRoot(subpath.to_string()));
    }

    let mut resolved = root.to_path_buf();
    resolved.extend(parts);
    Ok(resolved)
}

/// Reject a path that currently names a directory. Symlinks are not
/// followed, so a link to a directory is still addressable.
pub async fn ensure_not_directory(path: &Path) -> Result<(), FileError> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => Err(FileError::IsDirectory(path.to_path_buf())),
        _ => Ok(()),
    }
}
