//! Error types for canopy-client.

use std::io;
use std::path::{Path, PathBuf};

use canopy_core::DeltaError;
use canopy_types::{Manifest, WireError};
use reqwest::StatusCode;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be built or sent, or the body failed mid-way.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{method} {url}: {status}")]
    Status {
        /// Request method.
        method: &'static str,
        /// Request URL.
        url: String,
        /// Response status.
        status: StatusCode,
    },

    /// A URL could not be parsed or extended.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Local filesystem operation failed.
    #[error("{op} {}: {source}", .path.display())]
    Io {
        /// Operation being attempted.
        op: &'static str,
        /// Path it was attempted on.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A manifest path that would land outside the local directory.
    #[error("refusing unsafe path {0:?}")]
    UnsafePath(String),

    /// Scratch file for a transfer could not be used.
    #[error("temporary file: {0}")]
    TempFile(#[source] io::Error),

    /// The server sent something unparseable.
    #[error("bad response: {0}")]
    Decode(String),

    /// Local signature, delta or patch failed.
    #[error("delta engine: {0}")]
    Delta(#[from] DeltaError),

    /// Manifest download failed.
    #[error(transparent)]
    Manifest(#[from] ManifestFetchError),

    /// Local state store failed.
    #[error("local state: {0}")]
    Store(#[from] StoreError),

    /// A blocking worker panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Task(String),
}

impl ClientError {
    /// Wrap an I/O error with the operation and path.
    pub fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// True if a local file that was to be read does not exist.
    pub fn is_missing_local_file(&self) -> bool {
        matches!(self, Self::Io { op: "open", source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Local state store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("{}: {source}", .path.display())]
    Io {
        /// Backing file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The backing file does not hold a valid manifest, or encoding failed.
    #[error("{}: {source}", .path.display())]
    Encoding {
        /// Backing file.
        path: PathBuf,
        /// Underlying codec error.
        source: WireError,
    },
}

/// Why a manifest download stopped.
#[derive(Debug, Error)]
pub enum FetchCause {
    /// Transport failure before or during the body.
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response.
    #[error("server responded {0}")]
    Status(StatusCode),

    /// The body held something other than records.
    #[error("{0}")]
    Decode(#[from] WireError),
}

/// A manifest download that did not complete cleanly.
///
/// Records decoded before the failure are kept and available through
/// [`partial`](Self::partial); a status or connection failure leaves it
/// empty.
#[derive(Debug, Error)]
#[error("fetching manifest from {url}: {cause} ({} records decoded)", .partial.len())]
pub struct ManifestFetchError {
    url: String,
    #[source]
    cause: FetchCause,
    partial: Manifest,
}

impl ManifestFetchError {
    pub(crate) fn new(url: &str, cause: FetchCause, partial: Manifest) -> Self {
        Self {
            url: url.to_string(),
            cause,
            partial,
        }
    }

    /// What went wrong.
    pub fn cause(&self) -> &FetchCause {
        &self.cause
    }

    /// Records decoded before the failure.
    pub fn partial(&self) -> &Manifest {
        &self.partial
    }

    /// Take the records decoded before the failure.
    pub fn into_partial(self) -> Manifest {
        self.partial
    }
}
