//! Error types for canopy-server.

use std::io;
use std::path::{Path, PathBuf};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use canopy_core::DeltaError;
use canopy_types::WireError;

/// Startup and serving errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The listen address could not be bound.
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Per-request failure. Each variant maps to exactly one HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// No mount by that name.
    #[error("path not found: {0}")]
    UnknownMount(String),

    /// The request path resolves outside the mount root.
    #[error("path {0} escapes mount root")]
    EscapesRoot(String),

    /// The request path names an existing directory.
    #[error("{} is a directory", .0.display())]
    IsDirectory(PathBuf),

    /// Plain GET on a symlink; link targets travel in manifests instead.
    #[error("{} is a symlink", .0.display())]
    IsSymlink(PathBuf),

    /// Method not permitted on this resource or mount.
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// Filesystem operation failed.
    #[error("{op} {}: {source}", .path.display())]
    Io {
        /// Operation being attempted.
        op: &'static str,
        /// Path it was attempted on.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Scratch file could not be created or rewound.
    #[error("temporary file: {0}")]
    TempFile(#[source] io::Error),

    /// Reading a request body or writing a response stream failed.
    #[error("stream error: {0}")]
    Stream(#[from] io::Error),

    /// Encoding the manifest stream failed.
    #[error("manifest stream: {0}")]
    Wire(#[from] WireError),

    /// Signature, delta or patch failed.
    #[error("delta engine: {0}")]
    Delta(#[from] DeltaError),

    /// A blocking worker panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Task(String),
}

impl FileError {
    /// Wrap an I/O error with the operation and path.
    pub fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// HTTP status for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownMount(_) => StatusCode::NOT_FOUND,
            Self::EscapesRoot(_)
            | Self::IsDirectory(_)
            | Self::IsSymlink(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True if the peer hung up mid-response.
    pub fn is_disconnect(&self) -> bool {
        let io_err = match self {
            Self::Stream(e) => Some(e),
            Self::Delta(DeltaError::Io(e)) => Some(e),
            Self::Wire(WireError::Io(e)) => Some(e),
            _ => None,
        };
        io_err.is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe)
    }
}

impl IntoResponse for FileError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("Rejected request: {}", self);
        }
        (status, format!("{self}\n")).into_response()
    }
}
