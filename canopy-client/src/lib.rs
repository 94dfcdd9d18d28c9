//! # canopy-client
//!
//! Client side of canopy.
//!
//! - [`RemoteClient`] - HTTP access to a canopy server: manifests, file
//!   transfer and the signature/delta/patch protocol
//! - [`LocalStateStore`] - a durable local snapshot of a tree's manifest
//! - [`sync`] - the snapshot, fetch and store workflows built on both
//! - [`fs`] - the filesystem capability the client writes and reads through
//!
//! ## Example
//!
//! ```ignore
//! use canopy_client::{sync, RemoteClient};
//!
//! let client = RemoteClient::new();
//! sync::build_snapshot(&client, "http://host:8675/dest/", "dest.db".as_ref()).await?;
//! let report = sync::fetch(
//!     &client,
//!     "dest.db".as_ref(),
//!     "http://host:8675/src/",
//!     "staging".as_ref(),
//!     &Default::default(),
//! )
//! .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod client;
mod error;
pub mod fs;
mod store;
pub mod sync;

pub use client::{file_url, RemoteClient, OCTET_STREAM, SYMLINK_CONTENT_TYPE};
pub use error::{ClientError, FetchCause, ManifestFetchError, StoreError};
pub use fs::{LocalFs, MockFs, OsFs};
pub use store::LocalStateStore;
pub use sync::{FetchOptions, FetchReport, StoreOptions, StoreReport};
