//! RemoteClient - HTTP access to a canopy server.
//!
//! Every method maps to one request against the server surface:
//!
//! ```text
//! fetch_manifest    GET    /{mount}/
//! list_mounts       GET    /
//! download_file     GET    /{mount}/{path}
//! upload_file       PUT    /{mount}/{path}            application/octet-stream
//! create_symlink    PUT    /{mount}/{path}            application/symlink
//! delete_file       DELETE /{mount}/{path}
//! remote_signature  GET    /{mount}/{path}?rdiff=sig
//! remote_delta      PATCH  /{mount}/{path}?rdiff=delta
//! patch_remote      PATCH  /{mount}/{path}?rdiff=patch
//! ```
//!
//! Local files are reached through the injected [`LocalFs`].

use std::io::Seek;
use std::path::Path;
use std::sync::Arc;

use canopy_types::{Manifest, ManifestDecoder};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, Url};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::{ClientError, FetchCause, ManifestFetchError};
use crate::fs::{FileReader, FileWriter, LocalFs, OsFs};

/// Content type of file content.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Content type marking a PUT body as a symlink target.
pub const SYMLINK_CONTENT_TYPE: &str = "application/symlink";

const UPLOAD_CHUNK: usize = 64 * 1024;

/// HTTP client for one or more canopy servers.
#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    fs: Arc<dyn LocalFs>,
}

impl Default for RemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteClient {
    /// Client over the real filesystem.
    pub fn new() -> Self {
        Self::with_fs(Arc::new(OsFs))
    }

    /// Client over the given filesystem.
    pub fn with_fs(fs: Arc<dyn LocalFs>) -> Self {
        Self::with_http(reqwest::Client::new(), fs)
    }

    /// Client with a preconfigured HTTP client (timeouts, proxies, TLS).
    pub fn with_http(http: reqwest::Client, fs: Arc<dyn LocalFs>) -> Self {
        Self { http, fs }
    }

    /// Download and decode the manifest at `url`.
    ///
    /// Records are decoded as body chunks arrive. On failure the error
    /// still carries every record decoded before it.
    pub async fn fetch_manifest(&self, url: &str) -> Result<Manifest, ManifestFetchError> {
        let mut manifest = Manifest::new();
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => return Err(ManifestFetchError::new(url, e.into(), manifest)),
        };
        let status = response.status();
        if !status.is_success() {
            return Err(ManifestFetchError::new(
                url,
                FetchCause::Status(status),
                manifest,
            ));
        }

        let mut decoder = ManifestDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let fed = match chunk {
                Ok(bytes) => decoder.feed(&bytes, &mut manifest).map_err(FetchCause::from),
                Err(e) => Err(FetchCause::from(e)),
            };
            if let Err(cause) = fed {
                return Err(ManifestFetchError::new(url, cause, manifest));
            }
        }
        let decoded = decoder.decoded();
        if let Err(e) = decoder.finish() {
            return Err(ManifestFetchError::new(url, e.into(), manifest));
        }

        info!("Fetched {} records from {}", decoded, url);
        Ok(manifest)
    }

    /// Mount names served at `base_url`.
    pub async fn list_mounts(&self, base_url: &str) -> Result<Vec<String>, ClientError> {
        let response = self.http.get(base_url).send().await?;
        let response = expect_success("GET", base_url, response)?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Download `url` into `dest`, creating parent directories if the first
    /// create fails. Returns the number of bytes written.
    pub async fn download_file(&self, url: &str, dest: &Path) -> Result<u64, ClientError> {
        let response = self.http.get(url).send().await?;
        let response = expect_success("GET", url, response)?;

        let mut file = self.create_with_parents(dest).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ClientError::io("write", dest, e))?;
            written += chunk.len() as u64;
        }
        file.shutdown()
            .await
            .map_err(|e| ClientError::io("close", dest, e))?;

        debug!("Downloaded {} ({} bytes)", url, written);
        Ok(written)
    }

    /// Upload the local file `src` to `url`.
    pub async fn upload_file(&self, src: &Path, url: &str) -> Result<(), ClientError> {
        let reader = self
            .fs
            .open(src)
            .await
            .map_err(|e| ClientError::io("open", src, e))?;
        let response = self
            .http
            .put(url)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(body_from_reader(reader))
            .send()
            .await?;
        expect_success("PUT", url, response)?;
        debug!("Uploaded {} to {}", src.display(), url);
        Ok(())
    }

    /// Create (or replace) a symlink at `url` pointing at `target`.
    pub async fn create_symlink(&self, target: &str, url: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .put(url)
            .header(CONTENT_TYPE, SYMLINK_CONTENT_TYPE)
            .body(target.to_string())
            .send()
            .await?;
        expect_success("PUT", url, response)?;
        debug!("Linked {} -> {}", url, target);
        Ok(())
    }

    /// Remove the remote file at `url`.
    pub async fn delete_file(&self, url: &str) -> Result<(), ClientError> {
        let response = self.http.delete(url).send().await?;
        expect_success("DELETE", url, response)?;
        debug!("Deleted {}", url);
        Ok(())
    }

    /// Signature of the remote file at `url`.
    pub async fn remote_signature(&self, url: &str) -> Result<Vec<u8>, ClientError> {
        let url = with_rdiff(url, "sig")?;
        let response = self.http.get(url.clone()).send().await?;
        let response = expect_success("GET", url.as_str(), response)?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Delta from the local basis described by `signature` to the remote
    /// file at `url`, spooled into an anonymous temporary file and rewound.
    pub async fn remote_delta(
        &self,
        url: &str,
        signature: Vec<u8>,
    ) -> Result<std::fs::File, ClientError> {
        let url = with_rdiff(url, "delta")?;
        let response = self
            .http
            .patch(url.clone())
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(signature)
            .send()
            .await?;
        let response = expect_success("PATCH", url.as_str(), response)?;

        let mut spool = tempfile::tempfile().map_err(ClientError::TempFile)?;
        let mut writer =
            tokio::fs::File::from_std(spool.try_clone().map_err(ClientError::TempFile)?);
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            writer
                .write_all(&chunk?)
                .await
                .map_err(ClientError::TempFile)?;
        }
        writer.flush().await.map_err(ClientError::TempFile)?;
        drop(writer);

        spool.rewind().map_err(ClientError::TempFile)?;
        Ok(spool)
    }

    /// Apply `delta` to the remote file at `url` in place.
    pub async fn patch_remote(&self, url: &str, delta: std::fs::File) -> Result<(), ClientError> {
        let url = with_rdiff(url, "patch")?;
        let reader: FileReader = Box::new(tokio::fs::File::from_std(delta));
        let response = self
            .http
            .patch(url.clone())
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(body_from_reader(reader))
            .send()
            .await?;
        expect_success("PATCH", url.as_str(), response)?;
        debug!("Patched {}", url);
        Ok(())
    }

    async fn create_with_parents(&self, path: &Path) -> Result<FileWriter, ClientError> {
        match self.fs.create(path).await {
            Ok(file) => Ok(file),
            Err(first) => {
                debug!(
                    "Create {} failed ({}), creating parent directories",
                    path.display(),
                    first
                );
                if let Some(parent) = path.parent() {
                    self.fs
                        .create_dir_all(parent)
                        .await
                        .map_err(|e| ClientError::io("mkdir", parent, e))?;
                }
                self.fs
                    .create(path)
                    .await
                    .map_err(|e| ClientError::io("create", path, e))
            }
        }
    }
}

fn expect_success(
    method: &'static str,
    url: &str,
    response: Response,
) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Status {
            method,
            url: url.to_string(),
            status,
        })
    }
}

fn with_rdiff(url: &str, mode: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(url).map_err(|e| ClientError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut().append_pair("rdiff", mode);
    Ok(url)
}

/// Stream a local reader as a request body.
fn body_from_reader(reader: FileReader) -> reqwest::Body {
    let chunks = futures_util::stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = vec![0u8; UPLOAD_CHUNK];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    });
    reqwest::Body::wrap_stream(chunks)
}

/// URL of `path` (a `/`-separated manifest path) under the mount URL `base`.
///
/// Each path segment is percent-encoded, so names containing `?`, `#` or
/// spaces address the right file.
pub fn file_url(base: &str, path: &str) -> Result<String, ClientError> {
    let invalid = |reason: &str| ClientError::InvalidUrl {
        url: base.to_string(),
        reason: reason.to_string(),
    };
    let mut url = Url::parse(base).map_err(|e| invalid(&e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("cannot be a base URL"))?
        .pop_if_empty()
        .extend(path.split('/'));
    Ok(url.into())
}
