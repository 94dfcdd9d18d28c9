//! CLI command implementations.

pub mod builddb;
pub mod emptydb;
pub mod fetch;
pub mod mounts;
pub mod store;
