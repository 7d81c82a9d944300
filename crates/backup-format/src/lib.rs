//! # backup-format
//!
//! Data model shared by everything that stores backups on a WebDAV remote.
//!
//! This crate provides:
//! - [`BackupDescriptor`], the normalized description of one backup
//! - Remote object naming (`ha_backup_<id>.tar` and `ha_backup_<id>.json`)
//! - The metadata sidecar codec: [`encode`], [`decode`], [`decode_partial`]
//! - [`reconcile`], which rebuilds a descriptor from server file properties
//!   when the sidecar is missing or unreadable
//!
//! ## Example
//!
//! ```ignore
//! use backup_format::{decode, encode, BackupDescriptor};
//! use chrono::Utc;
//!
//! let descriptor = BackupDescriptor::new("abc123", "Nightly", Utc::now()).with_size(1024);
//! let bytes = encode(&descriptor)?;
//! assert_eq!(decode(&bytes)?, descriptor);
//! ```

mod descriptor;
mod error;
pub mod naming;
mod sidecar;

pub use descriptor::{BackupDescriptor, RemoteProps};
pub use error::{Error, Result};
pub use naming::{archive_name, sidecar_name, validate_id, ObjectKind, ObjectName};
pub use sidecar::{decode, decode_partial, encode, reconcile, PartialDescriptor};
