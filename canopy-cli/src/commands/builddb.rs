//! Snapshot a remote tree.

use anyhow::{Context, Result};
use canopy_client::{sync, RemoteClient};
use std::path::Path;

/// Run the builddb command.
pub async fn run(client: &RemoteClient, url: &str, db: &Path) -> Result<()> {
    let count = sync::build_snapshot(client, url, db)
        .await
        .with_context(|| format!("Failed to snapshot {}", url))?;
    println!("Saved {} entries to {}", count, db.display());
    Ok(())
}
