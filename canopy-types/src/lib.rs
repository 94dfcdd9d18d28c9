//! # canopy-types
//!
//! Manifest model and wire codecs shared by every canopy crate.
//!
//! - [`FileRecord`] - metadata and content fingerprint of one file or symlink
//! - [`Manifest`] - path-keyed set of records describing one tree
//! - [`ManifestDecoder`] / [`encode_record`] - the streaming JSON record format
//!   exchanged between server and client
//! - [`WireError`] - codec errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod manifest;
mod record;
mod stream;

pub use error::WireError;
pub use manifest::Manifest;
pub use record::FileRecord;
pub use stream::{encode_record, ManifestDecoder};
