//! Sync workflows.
//!
//! Each workflow is a straight pipeline: load state, reconcile with
//! [`canopy_core::diff`], act on each path in plan order, release. The
//! first failing step ends the run; nothing is retried or rolled back.
//!
//! A typical one-way mirror from `src` to `dest`:
//!
//! ```text
//! build_snapshot(src_url,  src.db)
//! build_snapshot(dest_url, dest.db)
//! fetch(dest.db, src_url, staging)    # pull what dest lacks into staging
//! store(src.db, dest_url, staging)    # push staging to dest, delete extras
//! ```

use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::{Component, Path, PathBuf};

use canopy_core::{diff, BlockDelta, DeltaEngine};
use tracing::{debug, info, warn};

use crate::client::{file_url, RemoteClient};
use crate::error::ClientError;
use crate::store::LocalStateStore;

/// Tuning for [`fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Directory holding an older copy of the source tree. Files present
    /// there are fetched as deltas against that copy.
    pub basis: Option<PathBuf>,
}

/// Tuning for [`store`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Send files that already exist at the destination as deltas.
    pub delta: bool,
}

/// What a [`fetch`] run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Paths downloaded whole.
    pub downloaded: Vec<String>,
    /// Paths rebuilt from a basis file plus a delta.
    pub patched: Vec<String>,
    /// Symlinks that differ; listed only, never materialized.
    pub symlinks: Vec<String>,
    /// Paths the destination has but the source lacks; reported only.
    pub to_remove: Vec<String>,
    /// Bytes of content received by whole downloads.
    pub bytes: u64,
}

/// What a [`store`] run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreReport {
    /// Remote paths deleted.
    pub deleted: Vec<String>,
    /// Paths uploaded whole.
    pub uploaded: Vec<String>,
    /// Paths updated by delta.
    pub patched: Vec<String>,
    /// Symlinks created or retargeted.
    pub linked: Vec<String>,
    /// Paths with nothing staged; left alone.
    pub skipped: Vec<String>,
}

/// Record the manifest at `url` in a fresh store at `store_path`.
///
/// The store file is only written once the whole manifest has arrived, so
/// a failed fetch leaves any previous snapshot untouched. Returns the
/// number of records saved.
pub async fn build_snapshot(
    client: &RemoteClient,
    url: &str,
    store_path: &Path,
) -> Result<usize, ClientError> {
    let manifest = client.fetch_manifest(url).await?;
    let mut store = LocalStateStore::create(store_path);
    for record in manifest.records() {
        store.add_file(record.clone());
    }
    let count = store.len();
    let bytes = store.manifest().total_size();
    store.release().await?;
    info!(
        "Saved {} records ({} bytes) to {}",
        count,
        bytes,
        store_path.display()
    );
    Ok(count)
}

/// Write an empty snapshot to `store_path`, describing an empty tree.
pub async fn empty_snapshot(store_path: &Path) -> Result<(), ClientError> {
    LocalStateStore::create(store_path).release().await?;
    info!("Saved empty snapshot to {}", store_path.display());
    Ok(())
}

/// Download everything the tree described by `dest_store` lacks from
/// `src_url` into `staging`, which is emptied first.
pub async fn fetch(
    client: &RemoteClient,
    dest_store: &Path,
    src_url: &str,
    staging: &Path,
    options: &FetchOptions,
) -> Result<FetchReport, ClientError> {
    let dest = LocalStateStore::open(dest_store).await?;
    let src = client.fetch_manifest(src_url).await?;
    let plan = diff(&src, dest.manifest());
    info!(
        "{} to fetch, {} only at destination",
        plan.to_add.len(),
        plan.to_remove.len()
    );

    reset_dir(staging).await?;

    let mut report = FetchReport {
        to_remove: plan.to_remove.clone(),
        ..FetchReport::default()
    };
    for path in &plan.to_add {
        let Some(record) = src.get(path) else {
            continue;
        };
        if record.is_symlink() {
            info!("Symlink {} -> {}", path, record.link_target);
            report.symlinks.push(path.clone());
            continue;
        }

        let url = file_url(src_url, path)?;
        let local = local_path(staging, path)?;
        let basis = match options.basis.as_deref() {
            Some(dir) => existing_file(&local_path(dir, path)?).await,
            None => None,
        };
        match basis {
            Some(basis) => {
                fetch_by_delta(client, &url, basis, local).await?;
                info!("Patched {}", path);
                report.patched.push(path.clone());
            }
            None => {
                let bytes = client.download_file(&url, &local).await?;
                info!("Fetched {} ({} bytes)", path, bytes);
                report.downloaded.push(path.clone());
                report.bytes += bytes;
            }
        }
    }
    for path in &report.to_remove {
        debug!("Only at destination: {}", path);
    }

    dest.release().await?;
    Ok(report)
}

/// Make the tree at `dest_url` match the snapshot in `src_store`, taking
/// file content from `staging`.
///
/// Remote deletions happen first. A path with no staged file is skipped
/// (the source no longer has it); any other failure ends the run.
pub async fn store(
    client: &RemoteClient,
    src_store: &Path,
    dest_url: &str,
    staging: &Path,
    options: &StoreOptions,
) -> Result<StoreReport, ClientError> {
    let src = LocalStateStore::open(src_store).await?;
    let dest = client.fetch_manifest(dest_url).await?;
    let plan = diff(src.manifest(), &dest);
    info!(
        "{} to store, {} to delete",
        plan.to_add.len(),
        plan.to_remove.len()
    );

    let mut report = StoreReport::default();
    for path in &plan.to_remove {
        client.delete_file(&file_url(dest_url, path)?).await?;
        info!("Deleted {}", path);
        report.deleted.push(path.clone());
    }

    for path in &plan.to_add {
        let Some(record) = src.manifest().get(path) else {
            continue;
        };
        let url = file_url(dest_url, path)?;
        if record.is_symlink() {
            client.create_symlink(&record.link_target, &url).await?;
            info!("Linked {} -> {}", path, record.link_target);
            report.linked.push(path.clone());
            continue;
        }

        let local = local_path(staging, path)?;
        let by_delta = options.delta && dest.get(path).is_some_and(|r| !r.is_symlink());
        let result = if by_delta {
            store_by_delta(client, &local, &url).await
        } else {
            client.upload_file(&local, &url).await
        };
        match result {
            Ok(()) if by_delta => {
                info!("Patched {}", path);
                report.patched.push(path.clone());
            }
            Ok(()) => {
                info!("Stored {}", path);
                report.uploaded.push(path.clone());
            }
            Err(e) if e.is_missing_local_file() => {
                warn!("Nothing staged for {}, skipping", path);
                report.skipped.push(path.clone());
            }
            Err(e) => return Err(e),
        }
    }

    src.release().await?;
    Ok(report)
}

/// `root` joined with a `/`-separated manifest path. Paths that could leave
/// `root` are refused.
fn local_path(root: &Path, path: &str) -> Result<PathBuf, ClientError> {
    let rel = Path::new(path);
    let safe = !path.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(root.join(rel))
    } else {
        Err(ClientError::UnsafePath(path.to_string()))
    }
}

async fn existing_file(path: &Path) -> Option<PathBuf> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_file() => Some(path.to_path_buf()),
        _ => None,
    }
}

async fn reset_dir(dir: &Path) -> Result<(), ClientError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Cleared {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(ClientError::io("remove", dir, e)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ClientError::io("mkdir", dir, e))
}

/// Rebuild the remote file at `url` into `dest` from the local `basis`.
async fn fetch_by_delta(
    client: &RemoteClient,
    url: &str,
    basis: PathBuf,
    dest: PathBuf,
) -> Result<(), ClientError> {
    let basis_for_sig = basis.clone();
    let signature = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ClientError> {
        let engine = BlockDelta::default();
        let file = std::fs::File::open(&basis_for_sig)
            .map_err(|e| ClientError::io("open", &basis_for_sig, e))?;
        let mut signature = Vec::new();
        engine.signature(&mut BufReader::new(file), &mut signature)?;
        Ok(signature)
    })
    .await
    .map_err(|e| ClientError::Task(e.to_string()))??;

    let delta = client.remote_delta(url, signature).await?;

    tokio::task::spawn_blocking(move || -> Result<(), ClientError> {
        let engine = BlockDelta::default();
        let mut basis_file =
            std::fs::File::open(&basis).map_err(|e| ClientError::io("open", &basis, e))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ClientError::io("mkdir", parent, e))?;
        }
        let out = std::fs::File::create(&dest).map_err(|e| ClientError::io("create", &dest, e))?;
        let mut out = BufWriter::new(out);
        engine.patch(&mut basis_file, &mut BufReader::new(delta), &mut out)?;
        out.flush().map_err(|e| ClientError::io("write", &dest, e))?;
        Ok(())
    })
    .await
    .map_err(|e| ClientError::Task(e.to_string()))?
}

/// Update the remote file at `url` to match `local` by sending a delta
/// against the remote content.
async fn store_by_delta(client: &RemoteClient, local: &Path, url: &str) -> Result<(), ClientError> {
    let file = tokio::fs::File::open(local)
        .await
        .map_err(|e| ClientError::io("open", local, e))?
        .into_std()
        .await;
    let signature = client.remote_signature(url).await?;

    let delta = tokio::task::spawn_blocking(move || -> Result<std::fs::File, ClientError> {
        let engine = BlockDelta::default();
        let mut spool = tempfile::tempfile().map_err(ClientError::TempFile)?;
        {
            let mut out = BufWriter::new(&mut spool);
            engine.delta(
                &mut signature.as_slice(),
                &mut BufReader::new(file),
                &mut out,
            )?;
            out.flush().map_err(ClientError::TempFile)?;
        }
        spool.rewind().map_err(ClientError::TempFile)?;
        Ok(spool)
    })
    .await
    .map_err(|e| ClientError::Task(e.to_string()))??;

    client.patch_remote(url, delta).await
}
