//! # backup-dav
//!
//! Backup store client for WebDAV remotes (Nextcloud, ownCloud and plain
//! WebDAV servers).
//!
//! This crate provides:
//! - DAV root discovery with a per-store cache ([`EndpointProfile`])
//! - Idempotent creation of the backup folder
//! - Spooled uploads sent with an exact `Content-Length`
//! - Listing that reconciles metadata sidecars with server file properties
//! - Streaming downloads and idempotent deletes
//!
//! ## Example
//!
//! ```ignore
//! use backup_dav::{BackupStore, StoreConfig};
//! use backup_format::BackupDescriptor;
//! use chrono::Utc;
//!
//! let config = StoreConfig::new("https://cloud.example.com", "alice", "app-password");
//! let store = BackupStore::connect(config).await?;
//!
//! let descriptor = BackupDescriptor::new("abc123", "Nightly", Utc::now());
//! let file = tokio::fs::File::open("backup.tar").await?;
//! store.upload(&descriptor, tokio_util::io::ReaderStream::new(file)).await?;
//!
//! for backup in store.list().await? {
//!     println!("{} {} {}", backup.id, backup.created_at, backup.size_bytes);
//! }
//! ```

pub mod bootstrap;
pub mod client;
pub mod config;
mod error;
pub mod multistatus;
pub mod resolver;
pub mod spool;
mod store;

pub use client::{DavClient, Depth};
pub use config::{ConfigFile, StoreConfig, DEFAULT_BACKUP_PATH, PASSWORD_ENV};
pub use error::{Result, StoreError};
pub use multistatus::DavEntry;
pub use resolver::{DavRoot, EndpointProfile};
pub use spool::{SpoolError, SpoolHandle};
pub use store::{BackupList, BackupStore, BackupStream, UploadOutcome};
