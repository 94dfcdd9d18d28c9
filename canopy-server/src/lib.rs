//! # canopy-server
//!
//! HTTP file store for canopy.
//!
//! Exposes a fixed set of named directory trees ("mounts") and serves, per
//! mount:
//! - a streamed manifest of every regular file and symlink in the tree
//! - file content, for download and (on writable mounts) upload and removal
//! - signature / delta / patch operations, so changed files can move as
//!   deltas instead of whole copies
//!
//! ## Layout
//!
//! ```text
//!   client ── HTTP ──► http::build_router
//!                          │
//!             ┌────────────┼──────────────┐
//!             ▼            ▼              ▼
//!        scan::Scanner  paths::resolve  canopy_core::DeltaEngine
//!             │            │              │
//!             └──────── mount root ───────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod http;
pub mod paths;
pub mod scan;

pub use config::{Config, ConfigError, Mount, MountTable};
pub use error::{FileError, ServerError};
pub use http::{build_router, serve, AppState};
