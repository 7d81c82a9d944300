//! dav-backup: Manage backups stored on a WebDAV remote.
//!
//! # Usage
//!
//! ```bash
//! # Check that the remote is reachable and the folder exists
//! DAV_BACKUP_PASSWORD=... dav-backup --config remote.toml check
//!
//! # Upload, list, fetch and remove backups
//! dav-backup --config remote.toml upload nightly.tar --id abc123 --name "Nightly"
//! dav-backup --config remote.toml list --json
//! dav-backup --config remote.toml download abc123 restore.tar
//! dav-backup --config remote.toml delete abc123
//! ```

use backup_dav::{BackupStore, ConfigFile, StoreError, UploadOutcome, PASSWORD_ENV};
use backup_format::BackupDescriptor;
use chrono::Utc;
use clap::{Parser, Subcommand};
use env_logger::Env;
use futures::StreamExt;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Manage backups stored on a WebDAV remote.
#[derive(Parser, Debug)]
#[command(name = "dav-backup")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML remote configuration
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify credentials and create the backup folder if needed
    Check,
    /// List stored backups, newest first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one backup
    Get { id: String },
    /// Upload an archive
    Upload {
        /// Archive to upload
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Backup id
        #[arg(long)]
        id: String,
        /// Display name (default: "Backup <id>")
        #[arg(long)]
        name: Option<String>,
        /// Mark the backup as password protected
        #[arg(long)]
        protected: bool,
    },
    /// Download an archive
    Download {
        id: String,
        #[arg(value_name = "OUT")]
        out: PathBuf,
    },
    /// Delete a backup and its metadata
    Delete { id: String },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let config = match ConfigFile::load(&args.config)
        .and_then(|file| file.into_store_config(std::env::var(PASSWORD_ENV).ok()))
    {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let store = match BackupStore::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create store: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&store, args.command).await {
        error!("{}", e);
        if e.is_auth_failure() {
            error!("Check the username and password (an app password may be required)");
        }
        process::exit(1);
    }
}

async fn run(store: &BackupStore, command: Command) -> Result<(), StoreError> {
    match command {
        Command::Check => {
            let count = store.validate().await?;
            let root = store.resolve().await?;
            info!("Remote OK: DAV root {}, {} backups", root, count);
        }
        Command::List { json } => {
            let backups: Vec<BackupDescriptor> = store.list().await?.collect();
            if json {
                let rendered = serde_json::to_string_pretty(&backups)
                    .map_err(backup_format::Error::from)?;
                println!("{}", rendered);
            } else {
                for b in &backups {
                    let lock = if b.protected { " [protected]" } else { "" };
                    println!(
                        "{}  {}  {:>12}  {}{}",
                        b.id,
                        b.created_at.format("%Y-%m-%d %H:%M:%S"),
                        b.size_bytes,
                        b.name,
                        lock
                    );
                }
            }
        }
        Command::Get { id } => {
            let backup = store.get(&id).await?;
            let rendered =
                serde_json::to_string_pretty(&backup).map_err(backup_format::Error::from)?;
            println!("{}", rendered);
        }
        Command::Upload {
            file,
            id,
            name,
            protected,
        } => {
            let name = name.unwrap_or_else(|| BackupDescriptor::default_name(&id));
            let descriptor = BackupDescriptor::new(id, name, Utc::now()).with_protected(protected);
            let source = ReaderStream::new(tokio::fs::File::open(&file).await?);

            match store.upload(&descriptor, source).await? {
                UploadOutcome::Complete { size_bytes } => {
                    info!("Uploaded {} ({} bytes)", descriptor.id, size_bytes)
                }
                UploadOutcome::ArchiveOnly {
                    size_bytes, reason, ..
                } => warn!(
                    "Uploaded {} ({} bytes) but its metadata could not be stored: {}",
                    descriptor.id, size_bytes, reason
                ),
            }
        }
        Command::Download { id, out } => {
            let mut stream = store.download(&id).await?;
            let mut file = tokio::fs::File::create(&out).await?;
            let mut written: u64 = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            info!("Wrote {} bytes to {}", written, out.display());
        }
        Command::Delete { id } => {
            store.delete(&id).await?;
            info!("Deleted {}", id);
        }
    }
    Ok(())
}
