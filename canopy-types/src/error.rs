//! Error types for the canopy wire formats.

use thiserror::Error;

/// Errors produced while encoding or decoding manifests.
#[derive(Debug, Error)]
pub enum WireError {
    /// A record in a JSON manifest stream could not be decoded.
    #[error("malformed record #{index}: {source}")]
    Malformed {
        /// Zero-based position of the failing record in the stream.
        index: usize,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The stream ended in the middle of a record.
    #[error("manifest stream ended inside a record ({pending} bytes pending)")]
    Truncated {
        /// Number of undecoded bytes left at end of stream.
        pending: usize,
    },

    /// JSON encoding failed.
    #[error("record encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// MessagePack serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed.
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Writing to the output sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// True if the error came from the output sink rather than the data.
    pub fn is_io(&self) -> bool {
        matches!(self, WireError::Io(_))
    }
}
