//! Remote object naming.
//!
//! Every backup is stored as two objects sharing the same id:
//! `ha_backup_<id>.tar` (the archive) and `ha_backup_<id>.json` (the sidecar).

use crate::{Error, Result};

/// Prefix shared by archive and sidecar object names.
pub const OBJECT_PREFIX: &str = "ha_backup_";
/// Suffix of archive objects.
pub const ARCHIVE_SUFFIX: &str = ".tar";
/// Suffix of sidecar objects.
pub const SIDECAR_SUFFIX: &str = ".json";

/// Which half of a backup an object name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// The archive bytes.
    Archive,
    /// The metadata sidecar.
    Sidecar,
}

/// A parsed remote object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName {
    /// Backup id embedded in the name.
    pub id: String,
    /// Archive or sidecar.
    pub kind: ObjectKind,
}

impl ObjectName {
    /// Parse a remote file name. Returns `None` for names that are not backup objects.
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(OBJECT_PREFIX)?;
        let (id, kind) = if let Some(id) = rest.strip_suffix(ARCHIVE_SUFFIX) {
            (id, ObjectKind::Archive)
        } else if let Some(id) = rest.strip_suffix(SIDECAR_SUFFIX) {
            (id, ObjectKind::Sidecar)
        } else {
            return None;
        };

        validate_id(id).ok()?;
        Some(Self {
            id: id.to_string(),
            kind,
        })
    }

    /// The file name this object is stored under.
    pub fn file_name(&self) -> String {
        match self.kind {
            ObjectKind::Archive => archive_name(&self.id),
            ObjectKind::Sidecar => sidecar_name(&self.id),
        }
    }
}

/// File name of the archive object for `id`.
pub fn archive_name(id: &str) -> String {
    format!("{}{}{}", OBJECT_PREFIX, id, ARCHIVE_SUFFIX)
}

/// File name of the sidecar object for `id`.
pub fn sidecar_name(id: &str) -> String {
    format!("{}{}{}", OBJECT_PREFIX, id, SIDECAR_SUFFIX)
}

/// Check that `id` can be embedded in a single remote path segment.
pub fn validate_id(id: &str) -> Result<()> {
    let reason = if id.is_empty() {
        "id is empty"
    } else if id == "." || id == ".." {
        "id is a relative path component"
    } else if id.contains('/') || id.contains('\\') {
        "id contains a path separator"
    } else if id.chars().any(char::is_control) {
        "id contains control characters"
    } else {
        return Ok(());
    };

    Err(Error::InvalidId {
        id: id.to_string(),
        reason,
    })
}
