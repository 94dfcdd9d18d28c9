//! The file endpoint: `/{mount}/{path}`.
//!
//! | Method | `rdiff`   | Effect                                              |
//! |--------|-----------|-----------------------------------------------------|
//! | GET    | none/empty| file content                                        |
//! | GET    | `sig`     | signature of the file                               |
//! | PUT    |           | create or replace (octet-stream) or symlink         |
//! | DELETE |           | remove                                              |
//! | PATCH  | `delta`   | delta from the uploaded signature to the file       |
//! | PATCH  | `patch`   | apply the uploaded delta to the file in place       |
//!
//! PUT, DELETE and `patch` require a writable mount.

use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use serde::Deserialize;
use tokio::fs;

use super::stream::{blocking_body, copy_body, spool_body};
use super::AppState;
use crate::config::Mount;
use crate::error::FileError;
use crate::paths;

/// Content type marking a PUT body as a symlink target.
pub const SYMLINK_CONTENT_TYPE: &str = "application/symlink";

/// Content type of file content.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Longest accepted symlink target.
const MAX_LINK_TARGET: usize = 4096;

/// `?rdiff=` selector.
#[derive(Debug, Default, Deserialize)]
pub struct RdiffQuery {
    rdiff: Option<String>,
}

/// Dispatch a request for one file.
pub async fn file_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((mount, subpath)): Path<(String, String)>,
    Query(query): Query<RdiffQuery>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, FileError> {
    let mount = state
        .mounts
        .get(&mount)
        .ok_or_else(|| FileError::UnknownMount(mount.clone()))?;
    let path = paths::resolve(&mount.root, &subpath)?;
    paths::ensure_not_directory(&path).await?;
    let rdiff = query.rdiff.as_deref();

    match method {
        Method::GET => match rdiff {
            None | Some("") => get_content(&path).await,
            Some("sig") => get_signature(&state, &path).await,
            Some(other) => Err(bad_rdiff(other)),
        },
        Method::PUT => {
            require_writable(mount, &method)?;
            put_file(&path, &headers, body).await
        }
        Method::DELETE => {
            require_writable(mount, &method)?;
            delete_file(&path).await
        }
        Method::PATCH => match rdiff {
            Some("delta") => compute_delta(&state, &path, body).await,
            Some("patch") => {
                require_writable(mount, &method)?;
                apply_patch(&state, &path, body).await
            }
            other => Err(bad_rdiff(other.unwrap_or(""))),
        },
        _ => Err(FileError::MethodNotAllowed(method.to_string())),
    }
}

fn bad_rdiff(value: &str) -> FileError {
    FileError::BadRequest(format!("invalid rdiff parameter: {value:?}"))
}

fn require_writable(mount: &Mount, method: &Method) -> Result<(), FileError> {
    if mount.writable {
        Ok(())
    } else {
        Err(FileError::MethodNotAllowed(format!(
            "{method} on read-only mount {}",
            mount.name
        )))
    }
}

/// Open an existing file for blocking reads.
async fn open_existing(path: &FsPath) -> Result<std::fs::File, FileError> {
    let file = fs::File::open(path)
        .await
        .map_err(|e| FileError::io("open", path, e))?;
    Ok(file.into_std().await)
}

async fn get_content(path: &FsPath) -> Result<Response, FileError> {
    let meta = fs::symlink_metadata(path)
        .await
        .map_err(|e| FileError::io("stat", path, e))?;
    if meta.file_type().is_symlink() {
        return Err(FileError::IsSymlink(path.to_path_buf()));
    }
    let mut file = open_existing(path).await?;

    tracing::debug!("Sending {}", path.display());
    let body = blocking_body(format!("download of {}", path.display()), move |out| {
        std::io::copy(&mut file, out)?;
        Ok(())
    });
    Ok(([(header::CONTENT_TYPE, OCTET_STREAM)], body).into_response())
}

async fn get_signature(state: &AppState, path: &FsPath) -> Result<Response, FileError> {
    let mut file = open_existing(path).await?;
    let engine = state.engine.clone();

    tracing::debug!("Signing {}", path.display());
    let body = blocking_body(format!("signature of {}", path.display()), move |out| {
        engine.signature(&mut file, out)?;
        Ok(())
    });
    Ok(([(header::CONTENT_TYPE, OCTET_STREAM)], body).into_response())
}

async fn put_file(path: &FsPath, headers: &HeaderMap, body: Body) -> Result<Response, FileError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let mime = content_type.split(';').next().unwrap_or("").trim();

    match mime {
        OCTET_STREAM => write_file(path, body).await?,
        SYMLINK_CONTENT_TYPE => write_symlink(path, body).await?,
        other => {
            return Err(FileError::BadRequest(format!(
                "unsupported content type {other:?}"
            )))
        }
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn write_file(path: &FsPath, body: Body) -> Result<(), FileError> {
    // Replace a symlink rather than writing through it.
    if let Ok(meta) = fs::symlink_metadata(path).await {
        if meta.file_type().is_symlink() {
            fs::remove_file(path)
                .await
                .map_err(|e| FileError::io("remove", path, e))?;
        }
    }

    let mut file = match fs::File::create(path).await {
        Ok(file) => file,
        Err(first) => {
            tracing::debug!(
                "Create {} failed ({}), creating parent directories",
                path.display(),
                first
            );
            if let Some(parent) = path.parent() {
                if let Err(e) = fs::create_dir_all(parent).await {
                    tracing::debug!("mkdir {} failed: {}", parent.display(), e);
                }
            }
            fs::File::create(path)
                .await
                .map_err(|e| FileError::io("create", path, e))?
        }
    };

    let written = copy_body(body, &mut file).await?;
    tracing::info!("Wrote {} ({} bytes)", path.display(), written);
    Ok(())
}

async fn write_symlink(path: &FsPath, body: Body) -> Result<(), FileError> {
    let raw = axum::body::to_bytes(body, MAX_LINK_TARGET)
        .await
        .map_err(|e| FileError::BadRequest(format!("reading link target: {e}")))?;
    let target = String::from_utf8(raw.to_vec())
        .map_err(|_| FileError::BadRequest("link target is not UTF-8".into()))?;
    if target.is_empty() {
        return Err(FileError::BadRequest("empty link target".into()));
    }

    match fs::symlink_metadata(path).await {
        Ok(_) => fs::remove_file(path)
            .await
            .map_err(|e| FileError::io("remove", path, e))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(FileError::io("stat", path, e)),
    }

    if let Err(first) = make_symlink(&target, path).await {
        if first.kind() != std::io::ErrorKind::NotFound {
            return Err(FileError::io("symlink", path, first));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FileError::io("mkdir", parent, e))?;
        }
        make_symlink(&target, path)
            .await
            .map_err(|e| FileError::io("symlink", path, e))?;
    }
    tracing::info!("Linked {} -> {}", path.display(), target);
    Ok(())
}

#[cfg(unix)]
async fn make_symlink(target: &str, link: &FsPath) -> std::io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn make_symlink(_target: &str, _link: &FsPath) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

async fn delete_file(path: &FsPath) -> Result<Response, FileError> {
    fs::remove_file(path)
        .await
        .map_err(|e| FileError::io("remove", path, e))?;
    tracing::info!("Deleted {}", path.display());
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Delta that turns the client's basis (described by the uploaded
/// signature) into this file.
async fn compute_delta(state: &AppState, path: &FsPath, body: Body) -> Result<Response, FileError> {
    let current = open_existing(path).await?;
    let signature = spool_body(body).await?;
    let engine = state.engine.clone();

    // Reject a bad signature while an error status can still be sent.
    let checker = engine.clone();
    let signature = tokio::task::spawn_blocking(move || -> Result<std::fs::File, FileError> {
        let mut signature = signature;
        checker.check_signature(&mut BufReader::new(&mut signature))?;
        signature.rewind().map_err(FileError::TempFile)?;
        Ok(signature)
    })
    .await
    .map_err(|e| FileError::Task(e.to_string()))??;

    tracing::debug!("Computing delta for {}", path.display());
    let body = blocking_body(format!("delta of {}", path.display()), move |out| {
        let mut signature = BufReader::new(signature);
        let mut current = BufReader::new(current);
        engine.delta(&mut signature, &mut current, out)?;
        Ok(())
    });
    Ok(([(header::CONTENT_TYPE, OCTET_STREAM)], body).into_response())
}

/// Rebuild this file from itself plus the uploaded delta. The result is
/// written beside the file and renamed over it, so readers see either the
/// old or the new content.
async fn apply_patch(state: &AppState, path: &FsPath, body: Body) -> Result<Response, FileError> {
    let basis = open_existing(path).await?;
    let delta = spool_body(body).await?;
    let engine = state.engine.clone();
    let target: PathBuf = path.to_path_buf();
    let dir = path
        .parent()
        .map(FsPath::to_path_buf)
        .ok_or_else(|| FileError::BadRequest(format!("{} has no parent", path.display())))?;

    tokio::task::spawn_blocking(move || -> Result<(), FileError> {
        let permissions = basis.metadata().map(|meta| meta.permissions());
        let mut basis = BufReader::new(basis);
        let mut delta = BufReader::new(delta);
        let mut patched = tempfile::Builder::new()
            .prefix(".canopy-patch.")
            .tempfile_in(&dir)
            .map_err(FileError::TempFile)?;
        {
            let mut out = BufWriter::new(patched.as_file_mut());
            engine.patch(&mut basis, &mut delta, &mut out)?;
            out.flush()?;
        }
        if let Ok(permissions) = permissions {
            if let Err(e) = patched.as_file().set_permissions(permissions) {
                tracing::warn!("Cannot copy permissions to {}: {}", target.display(), e);
            }
        }
        patched
            .persist(&target)
            .map_err(|e| FileError::io("rename", &target, e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| FileError::Task(e.to_string()))??;

    tracing::info!("Patched {}", path.display());
    Ok(StatusCode::NO_CONTENT.into_response())
}
