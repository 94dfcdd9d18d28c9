//! List server mounts.

use anyhow::{Context, Result};
use canopy_client::RemoteClient;

/// Run the mounts command.
pub async fn run(client: &RemoteClient, url: &str) -> Result<()> {
    let mounts = client
        .list_mounts(url)
        .await
        .with_context(|| format!("Failed to list mounts at {}", url))?;
    for name in mounts {
        println!("{}", name);
    }
    Ok(())
}
