//! # canopy
//!
//! Command-line client for canopy servers.
//!
//! ## Commands
//!
//! - `builddb`: Snapshot a remote tree's manifest into a local store
//! - `emptydb`: Write an empty snapshot
//! - `fetch`: Pull what a snapshot lacks from a remote tree into staging
//! - `store`: Push staging to a remote tree so it matches a snapshot
//! - `mounts`: List a server's mounts
//!
//! ## Example
//!
//! ```bash
//! # Mirror src onto dest through a local staging directory
//! canopy builddb http://host:8675/src/ src.db
//! canopy builddb http://host:8675/dest/ dest.db
//! canopy fetch dest.db http://host:8675/src/ staging
//! canopy store src.db http://host:8675/dest/ staging
//! ```

use anyhow::Result;
use canopy_client::{FetchOptions, RemoteClient, StoreOptions};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::{builddb, emptydb, fetch, mounts, store};

/// Manifest-driven file sync against canopy servers.
#[derive(Parser, Debug)]
#[command(name = "canopy")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log per-file detail
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save the manifest at a mount URL into a local store
    Builddb {
        /// Mount URL, e.g. http://host:8675/src/
        url: String,
        /// Store file to write
        db: PathBuf,
    },

    /// Save an empty manifest, describing an empty tree
    Emptydb {
        /// Store file to write
        db: PathBuf,
    },

    /// Download what the tree described by a store lacks into staging
    Fetch {
        /// Store describing the destination tree
        dest_db: PathBuf,
        /// Source mount URL
        src_url: String,
        /// Staging directory (emptied first)
        staging: PathBuf,
        /// Older local copy of the source tree to fetch deltas against
        #[arg(long)]
        basis: Option<PathBuf>,
    },

    /// Make a remote tree match a store, using files from staging
    Store {
        /// Store describing the wanted tree
        src_db: PathBuf,
        /// Destination mount URL
        dest_url: String,
        /// Staging directory holding the content to send
        staging: PathBuf,
        /// Send deltas for files the destination already has
        #[arg(long)]
        delta: bool,
    },

    /// List the mounts a server exposes
    Mounts {
        /// Server URL, e.g. http://host:8675/
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "canopy_client=debug,canopy=debug"
    } else {
        "canopy_client=info,canopy=info"
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let client = RemoteClient::new();

    match cli.command {
        Commands::Builddb { url, db } => {
            builddb::run(&client, &url, &db).await?;
        }
        Commands::Emptydb { db } => {
            emptydb::run(&db).await?;
        }
        Commands::Fetch {
            dest_db,
            src_url,
            staging,
            basis,
        } => {
            let options = FetchOptions { basis };
            fetch::run(&client, &dest_db, &src_url, &staging, &options).await?;
        }
        Commands::Store {
            src_db,
            dest_url,
            staging,
            delta,
        } => {
            let options = StoreOptions { delta };
            store::run(&client, &src_db, &dest_url, &staging, &options).await?;
        }
        Commands::Mounts { url } => {
            mounts::run(&client, &url).await?;
        }
    }

    Ok(())
}
