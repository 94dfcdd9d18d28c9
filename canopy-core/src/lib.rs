//! # canopy-core
//!
//! Pure logic for canopy (no network, instant tests).
//!
//! - [`diff`] reconciles two manifests into a [`SyncPlan`]
//! - [`checksum`] computes the 64-bit content fingerprint stored in manifests
//! - [`delta`] implements the signature / delta / patch protocol used to
//!   transfer only the changed parts of a file
//!
//! Everything here works on in-memory values or caller-supplied
//! `Read`/`Write` streams. Network and request handling live in
//! `canopy-client` and `canopy-server`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod delta;
pub mod diff;
pub mod rolling;

pub use checksum::{content_hash, file_hash};
pub use delta::{BlockDelta, DeltaEngine, DeltaError, ReadSeek, DEFAULT_BLOCK_SIZE};
pub use diff::{diff, SyncPlan};
pub use rolling::RollingChecksum;
