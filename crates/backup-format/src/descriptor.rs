use crate::naming::{archive_name, sidecar_name};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// The normalized description of one stored backup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupDescriptor {
    /// Opaque unique identifier. Determines both remote object names.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// When the backup was taken.
    pub created_at: DateTime<Utc>,
    /// Archive size in bytes.
    pub size_bytes: u64,
    /// Whether the archive is password protected.
    pub protected: bool,
    /// Producer-defined metadata, carried opaquely.
    pub extra_metadata: Map<String, Value>,
    /// Top-level sidecar keys this version does not interpret. Written back
    /// unchanged by [`crate::encode`], except keys that name a descriptor field.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra_fields: Map<String, Value>,
}

impl BackupDescriptor {
    /// Create a descriptor with no size, no protection and no extra metadata.
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at,
            size_bytes: 0,
            protected: false,
            extra_metadata: Map::new(),
            extra_fields: Map::new(),
        }
    }

    /// Set the archive size.
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// Set the protection flag.
    pub fn with_protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    /// Add one entry of producer metadata.
    pub fn with_extra_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_metadata.insert(key.into(), value.into());
        self
    }

    /// Name given to backups whose sidecar does not provide one.
    pub fn default_name(id: &str) -> String {
        format!("Backup {}", id)
    }

    /// File name of the archive object.
    pub fn archive_name(&self) -> String {
        archive_name(&self.id)
    }

    /// File name of the sidecar object.
    pub fn sidecar_name(&self) -> String {
        sidecar_name(&self.id)
    }

    /// `<folder>/ha_backup_<id>.tar`
    pub fn archive_path(&self, folder: &str) -> String {
        join_folder(folder, &self.archive_name())
    }

    /// `<folder>/ha_backup_<id>.json`
    pub fn metadata_path(&self, folder: &str) -> String {
        join_folder(folder, &self.sidecar_name())
    }
}

fn join_folder(folder: &str, name: &str) -> String {
    format!("{}/{}", folder.trim_end_matches('/'), name)
}

/// File properties reported by the server for a remote archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteProps {
    /// `getcontentlength`
    pub size_bytes: u64,
    /// `getlastmodified`, when the server reported a parseable value.
    pub modified_at: Option<DateTime<Utc>>,
}
