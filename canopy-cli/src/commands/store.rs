//! Push staging to a remote tree.

use anyhow::{Context, Result};
use canopy_client::{sync, RemoteClient, StoreOptions, StoreReport};
use std::path::Path;

/// Run the store command.
pub async fn run(
    client: &RemoteClient,
    src_db: &Path,
    dest_url: &str,
    staging: &Path,
    options: &StoreOptions,
) -> Result<()> {
    let report = sync::store(client, src_db, dest_url, staging, options)
        .await
        .with_context(|| format!("Failed to store to {}", dest_url))?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &StoreReport) {
    println!(
        "Stored {} files, patched {}, linked {}, deleted {}",
        report.uploaded.len(),
        report.patched.len(),
        report.linked.len(),
        report.deleted.len()
    );
    for path in &report.skipped {
        println!("  skipped {} (nothing staged)", path);
    }
}
