//! Pull missing and changed files into staging.

use anyhow::{Context, Result};
use canopy_client::{sync, FetchOptions, FetchReport, RemoteClient};
use std::path::Path;

/// Run the fetch command.
pub async fn run(
    client: &RemoteClient,
    dest_db: &Path,
    src_url: &str,
    staging: &Path,
    options: &FetchOptions,
) -> Result<()> {
    let report = sync::fetch(client, dest_db, src_url, staging, options)
        .await
        .with_context(|| format!("Failed to fetch from {}", src_url))?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &FetchReport) {
    println!(
        "Fetched {} files ({} bytes), {} by delta",
        report.downloaded.len(),
        report.bytes,
        report.patched.len()
    );
    if !report.symlinks.is_empty() {
        println!("Symlinks (not staged):");
        for path in &report.symlinks {
            println!("  {}", path);
        }
    }
    if !report.to_remove.is_empty() {
        println!("Only at destination:");
        for path in &report.to_remove {
            println!("  {}", path);
        }
    }
}
