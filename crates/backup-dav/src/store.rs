//! The backup store facade.
//!
//! [`BackupStore`] ties the pieces together: the resolver supplies the active
//! DAV root, the spool manager stages uploads, and the sidecar codec turns
//! folder listings into [`BackupDescriptor`]s.

use crate::bootstrap;
use crate::client::{DavClient, Depth, LIST_BODY};
use crate::config::StoreConfig;
use crate::multistatus::{parse_multistatus, DavEntry};
use crate::resolver::{DavRoot, EndpointProfile};
use crate::spool::{spool, SpoolHandle};
use crate::{Result, StoreError};
use backup_format::{
    archive_name, decode_partial, encode, reconcile, sidecar_name, validate_id, BackupDescriptor,
    ObjectKind, ObjectName, PartialDescriptor, RemoteProps,
};
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use log::{debug, info, trace, warn};
use reqwest::{StatusCode, Url};
use std::collections::{BTreeMap, HashSet};
use std::io;

/// Archive bytes returned by [`BackupStore::download`].
pub type BackupStream = BoxStream<'static, Result<Bytes>>;

/// Backups returned by [`BackupStore::list`], newest first.
///
/// Consumed as it is iterated; call `list` again for a fresh view.
#[derive(Debug)]
pub struct BackupList {
    inner: std::vec::IntoIter<BackupDescriptor>,
}

impl BackupList {
    fn new(mut descriptors: Vec<BackupDescriptor>) -> Self {
        descriptors.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Self {
            inner: descriptors.into_iter(),
        }
    }

    fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for BackupList {
    type Item = BackupDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for BackupList {}

/// Result of a successful archive upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Archive and sidecar were both stored.
    Complete { size_bytes: u64 },
    /// The archive was stored but its sidecar was not.
    ///
    /// The backup still lists, with metadata reconstructed from the archive's
    /// file properties.
    ArchiveOnly {
        size_bytes: u64,
        status: Option<StatusCode>,
        reason: String,
    },
}

impl UploadOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, UploadOutcome::Complete { .. })
    }

    /// Bytes written to the archive object.
    pub fn size_bytes(&self) -> u64 {
        match self {
            UploadOutcome::Complete { size_bytes } | UploadOutcome::ArchiveOnly { size_bytes, .. } => {
                *size_bytes
            }
        }
    }
}

/// Backup store on one WebDAV remote.
///
/// All operations take `&self` and may run concurrently.
pub struct BackupStore {
    config: StoreConfig,
    client: DavClient,
    profile: EndpointProfile,
}

impl BackupStore {
    /// Create a store without contacting the server.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let client = DavClient::new(&config)?;
        let profile = EndpointProfile::new(&config)?;
        Ok(Self {
            config,
            client,
            profile,
        })
    }

    /// Create a store, resolve its DAV root and make sure the backup folder exists.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let store = Self::new(config)?;
        store.ensure_folder().await?;
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn profile(&self) -> &EndpointProfile {
        &self.profile
    }

    /// The active DAV root. Probes the server only on first use.
    pub async fn resolve(&self) -> Result<DavRoot> {
        self.profile.resolve(&self.client).await
    }

    /// Create the backup folder if it is missing.
    pub async fn ensure_folder(&self) -> Result<()> {
        let root = self.resolve().await?;
        bootstrap::ensure_folder(&self.client, &self.profile, &root).await
    }

    /// Check credentials, folder access and listing. Returns the number of backups.
    pub async fn validate(&self) -> Result<usize> {
        self.ensure_folder().await?;
        Ok(self.list().await?.len())
    }

    /// List all backups in the folder.
    ///
    /// Every archive is listed, including those whose sidecar is missing or
    /// unreadable. Sidecars without an archive are ignored.
    pub async fn list(&self) -> Result<BackupList> {
        let root = self.resolve().await?;
        let (root, entries) = match self.list_folder(&root).await? {
            Some(entries) => (root, entries),
            None => {
                self.profile.invalidate(&root);
                let fresh = self.resolve().await?;
                if fresh == root {
                    debug!("Backup folder does not exist yet");
                    return Ok(BackupList::empty());
                }
                match self.list_folder(&fresh).await? {
                    Some(entries) => (fresh, entries),
                    None => return Ok(BackupList::empty()),
                }
            }
        };

        let mut archives: BTreeMap<String, RemoteProps> = BTreeMap::new();
        let mut sidecars: HashSet<String> = HashSet::new();
        for entry in entries.iter().filter(|e| !e.is_collection) {
            match ObjectName::parse(&entry.name) {
                Some(ObjectName {
                    id,
                    kind: ObjectKind::Archive,
                }) => {
                    archives.insert(id, entry.remote_props());
                }
                Some(ObjectName {
                    id,
                    kind: ObjectKind::Sidecar,
                }) => {
                    sidecars.insert(id);
                }
                None => trace!("Skipping unrelated file {}", entry.name),
            }
        }

        let root = &root;
        let sidecars = &sidecars;
        let descriptors: Vec<BackupDescriptor> = stream::iter(archives)
            .map(|(id, props)| async move {
                let partial = if sidecars.contains(&id) {
                    self.fetch_sidecar(root, &id).await
                } else {
                    debug!("Backup {} has no sidecar", id);
                    None
                };
                reconcile(partial, &id, &props)
            })
            .buffer_unordered(self.config.list_concurrency)
            .collect()
            .await;

        debug!("Listed {} backups", descriptors.len());
        Ok(BackupList::new(descriptors))
    }

    /// Look up a single backup.
    pub async fn get(&self, id: &str) -> Result<BackupDescriptor> {
        validate_id(id)?;
        let root = self.resolve().await?;
        let url = self.profile.object_url(&root, &archive_name(id));

        let response = self.client.propfind(&url, Depth::Zero, LIST_BODY).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_string()));
        }
        check_status("PROPFIND", &url, status)?;

        let body = response
            .text()
            .await
            .map_err(StoreError::transport("PROPFIND"))?;
        let entries = parse_multistatus(&body)?;
        let props = entries
            .iter()
            .find(|e| !e.is_collection)
            .map(DavEntry::remote_props)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let partial = self.fetch_sidecar(&root, id).await;
        Ok(reconcile(partial, id, &props))
    }

    /// Store a backup: the archive from `source`, then its sidecar.
    ///
    /// The archive is staged locally first so it can be sent with an exact
    /// `Content-Length`. The recorded size is the number of bytes staged. A
    /// sidecar failure after the archive was stored yields
    /// [`UploadOutcome::ArchiveOnly`] and leaves the archive in place.
    pub async fn upload<S>(&self, descriptor: &BackupDescriptor, source: S) -> Result<UploadOutcome>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        validate_id(&descriptor.id)?;
        let root = self.resolve().await?;
        bootstrap::ensure_folder(&self.client, &self.profile, &root).await?;

        let spooled = spool(source, self.config.spool_dir.as_deref())
            .await
            .map_err(|source| StoreError::Spool {
                id: descriptor.id.clone(),
                source,
            })?;

        let outcome = self.store_pair(&root, descriptor, &spooled).await;
        if let Err(e) = spooled.release() {
            warn!("Cannot remove spool file for backup {}: {}", descriptor.id, e);
        }
        outcome
    }

    async fn store_pair(
        &self,
        root: &DavRoot,
        descriptor: &BackupDescriptor,
        spooled: &SpoolHandle,
    ) -> Result<UploadOutcome> {
        let id = &descriptor.id;
        let size_bytes = spooled.len();
        let sidecar = encode(&descriptor.clone().with_size(size_bytes))?;

        let archive_url = self.profile.object_url(root, &descriptor.archive_name());
        info!("Uploading backup {} ({} bytes)", id, size_bytes);
        let response = self
            .client
            .put_file(&archive_url, spooled)
            .await
            .map_err(|e| StoreError::Upload {
                id: id.clone(),
                status: e.status(),
                message: Some(e.to_string()),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Upload {
                id: id.clone(),
                status: Some(status),
                message: None,
            });
        }

        let sidecar_url = self.profile.object_url(root, &descriptor.sidecar_name());
        let (status, reason) = match self
            .client
            .put_bytes(&sidecar_url, sidecar, "application/json")
            .await
        {
            Ok(response) if response.status().is_success() => {
                info!("Uploaded backup {}", id);
                return Ok(UploadOutcome::Complete { size_bytes });
            }
            Ok(response) => (
                Some(response.status()),
                format!("HTTP {}", response.status()),
            ),
            Err(e) => (e.status(), e.to_string()),
        };

        warn!(
            "Backup {} stored without metadata sidecar: {}",
            id, reason
        );
        Ok(UploadOutcome::ArchiveOnly {
            size_bytes,
            status,
            reason,
        })
    }

    /// Stream an archive back.
    ///
    /// A missing archive is reported before any bytes are produced.
    pub async fn download(&self, id: &str) -> Result<BackupStream> {
        validate_id(id)?;
        let root = self.resolve().await?;
        let url = self.profile.object_url(&root, &archive_name(id));

        let response = self.client.get_stream(&url).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_string()));
        }
        check_status("GET", &url, status)?;

        debug!("Streaming backup {}", id);
        Ok(self.client.body_stream(response))
    }

    /// Remove a backup's archive, then its sidecar.
    ///
    /// An object that is already gone counts as deleted. If the archive cannot
    /// be deleted the sidecar is left untouched.
    pub async fn delete(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        let root = self.resolve().await?;
        self.delete_object(&root, id, &archive_name(id), "archive")
            .await?;
        self.delete_object(&root, id, &sidecar_name(id), "sidecar")
            .await?;
        info!("Deleted backup {}", id);
        Ok(())
    }

    async fn delete_object(
        &self,
        root: &DavRoot,
        id: &str,
        file_name: &str,
        object: &str,
    ) -> Result<()> {
        let url = self.profile.object_url(root, file_name);
        let status = self.client.delete(&url).await?.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::NOT_FOUND {
            debug!("{} of backup {} already absent", object, id);
            Ok(())
        } else {
            Err(StoreError::Delete {
                id: id.to_string(),
                object: object.to_string(),
                status,
            })
        }
    }

    /// Depth-1 PROPFIND of the folder. `None` when the server answers 404.
    async fn list_folder(&self, root: &DavRoot) -> Result<Option<Vec<DavEntry>>> {
        let url = self.profile.folder_url(root);
        let response = self.client.propfind(&url, Depth::One, LIST_BODY).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status("PROPFIND", &url, status)?;

        let body = response
            .text()
            .await
            .map_err(StoreError::transport("PROPFIND"))?;
        parse_multistatus(&body).map(Some)
    }

    /// Fetch and decode a sidecar. Any failure means "no usable sidecar".
    async fn fetch_sidecar(&self, root: &DavRoot, id: &str) -> Option<PartialDescriptor> {
        let url = self.profile.object_url(root, &sidecar_name(id));
        let response = match self.client.get(&url).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Cannot fetch sidecar of backup {}: {}", id, e);
                return None;
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Backup {} has no sidecar", id);
            return None;
        }
        if !status.is_success() {
            warn!("Cannot fetch sidecar of backup {}: HTTP {}", id, status);
            return None;
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cannot read sidecar of backup {}: {}", id, e);
                return None;
            }
        };

        match decode_partial(&bytes) {
            Ok(partial) => {
                if !partial.invalid_fields.is_empty() {
                    warn!(
                        "Sidecar of backup {} has unreadable fields {:?}; using file properties",
                        id, partial.invalid_fields
                    );
                }
                Some(partial)
            }
            Err(e) => {
                warn!(
                    "Sidecar of backup {} is unreadable ({}); using file properties",
                    id, e
                );
                None
            }
        }
    }
}

fn check_status(op: &'static str, url: &Url, status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StoreError::Status {
            op,
            url: url.to_string(),
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(id: &str, hour: u32) -> BackupDescriptor {
        BackupDescriptor::new(id, "", Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap())
    }

    #[test]
    fn test_backup_list_order() {
        let list = BackupList::new(vec![at("b", 1), at("c", 5), at("a", 1), at("d", 3)]);
        assert_eq!(list.len(), 4);
        let ids: Vec<String> = list.map(|d| d.id).collect();
        assert_eq!(ids, vec!["c", "d", "a", "b"]);
    }

    #[test]
    fn test_upload_outcome_size() {
        let complete = UploadOutcome::Complete { size_bytes: 7 };
        let partial = UploadOutcome::ArchiveOnly {
            size_bytes: 7,
            status: Some(StatusCode::INTERNAL_SERVER_ERROR),
            reason: "HTTP 500".into(),
        };
        assert!(complete.is_complete());
        assert!(!partial.is_complete());
        assert_eq!(partial.size_bytes(), complete.size_bytes());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = StoreConfig::new("not a url", "alice", "pw");
        assert!(matches!(BackupStore::new(config), Err(StoreError::Config(_))));
    }
}
