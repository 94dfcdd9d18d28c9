//! Write an empty snapshot.

use anyhow::{Context, Result};
use canopy_client::sync;
use std::path::Path;

/// Run the emptydb command.
pub async fn run(db: &Path) -> Result<()> {
    sync::empty_snapshot(db)
        .await
        .with_context(|| format!("Failed to write {}", db.display()))?;
    println!("Saved empty snapshot to {}", db.display());
    Ok(())
}
