//! DAV root discovery.
//!
//! A server exposes the user's files under one of a few known layouts. The
//! first candidate that answers a depth-0 PROPFIND is adopted and cached on
//! the [`EndpointProfile`] for its lifetime, unless a later request signals
//! that the root has gone away.

use crate::client::{DavClient, Depth, PROBE_BODY};
use crate::config::{split_path, StoreConfig};
use crate::{Result, StoreError};
use log::{debug, info};
use reqwest::{StatusCode, Url};
use std::fmt;
use std::sync::RwLock;

/// A DAV root layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DavRoot {
    /// `remote.php/dav/files/<username>/`
    UserFiles(String),
    /// `remote.php/webdav/`
    Legacy,
    /// A configured path, used as-is.
    Custom(String),
}

impl DavRoot {
    /// Path segments below the base URL.
    pub fn segments(&self) -> Vec<String> {
        match self {
            DavRoot::UserFiles(user) => vec![
                "remote.php".to_string(),
                "dav".to_string(),
                "files".to_string(),
                user.clone(),
            ],
            DavRoot::Legacy => vec!["remote.php".to_string(), "webdav".to_string()],
            DavRoot::Custom(path) => split_path(path),
        }
    }
}

impl fmt::Display for DavRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let segments = self.segments();
        if segments.is_empty() {
            return f.write_str("/");
        }
        write!(f, "/{}/", segments.join("/"))
    }
}

/// Resolved connection state for one remote.
///
/// Shared by all operations of a store. The cached root is read far more
/// often than written; writers publish a complete value under the lock and
/// the lock is never held across a network call.
#[derive(Debug)]
pub struct EndpointProfile {
    base_url: Url,
    username: String,
    override_root: Option<DavRoot>,
    folder: Vec<String>,
    cached: RwLock<Option<DavRoot>>,
}

impl EndpointProfile {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.parsed_base_url()?,
            username: config.username.clone(),
            override_root: config.dav_root.clone().map(DavRoot::Custom),
            folder: config.folder_segments(),
            cached: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Backup folder segments below the DAV root.
    pub fn folder(&self) -> &[String] {
        &self.folder
    }

    /// Candidate roots in probe order.
    pub fn candidates(&self) -> Vec<DavRoot> {
        vec![DavRoot::UserFiles(self.username.clone()), DavRoot::Legacy]
    }

    /// The cached root, if resolution already happened.
    pub fn cached(&self) -> Option<DavRoot> {
        match self.cached.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn publish(&self, root: &DavRoot) {
        let mut guard = match self.cached.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(root.clone());
    }

    /// Forget `root` if it is still the cached value.
    ///
    /// Returns whether the cache was cleared. A root adopted concurrently by
    /// another operation is left alone.
    pub fn invalidate(&self, root: &DavRoot) -> bool {
        let mut guard = match self.cached.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.as_ref() == Some(root) {
            *guard = None;
            info!("Dropped cached DAV root {}", root);
            true
        } else {
            false
        }
    }

    /// Return the active DAV root, probing the server on first use.
    pub async fn resolve(&self, client: &DavClient) -> Result<DavRoot> {
        if let Some(root) = self.cached() {
            return Ok(root);
        }
        if let Some(root) = &self.override_root {
            self.publish(root);
            return Ok(root.clone());
        }

        let mut last_status: Option<StatusCode> = None;
        let mut last_error: Option<String> = None;

        for candidate in self.candidates() {
            let url = self.root_url(&candidate);
            match client.propfind(&url, Depth::Zero, PROBE_BODY).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        info!("Using DAV root {} at {}", candidate, self.base_url);
                        self.publish(&candidate);
                        return Ok(candidate);
                    }
                    debug!("DAV root {} rejected: HTTP {}", candidate, status);
                    last_status = Some(status);
                    last_error = None;
                }
                Err(e) => {
                    debug!("DAV root {} unreachable: {}", candidate, e);
                    last_status = None;
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(StoreError::Resolution {
            base_url: self.base_url.to_string(),
            last_status,
            last_error,
        })
    }

    /// Collection URL of `root`, with a trailing slash.
    pub fn root_url(&self, root: &DavRoot) -> Url {
        self.build_url(&root.segments(), true)
    }

    /// Collection URL of the backup folder under `root`.
    pub fn folder_url(&self, root: &DavRoot) -> Url {
        let mut segments = root.segments();
        segments.extend(self.folder.iter().cloned());
        self.build_url(&segments, true)
    }

    /// Collection URLs of every folder level from the outermost down.
    pub fn folder_chain(&self, root: &DavRoot) -> Vec<Url> {
        let mut segments = root.segments();
        let mut chain = Vec::with_capacity(self.folder.len());
        for part in &self.folder {
            segments.push(part.clone());
            chain.push(self.build_url(&segments, true));
        }
        chain
    }

    /// URL of a file inside the backup folder.
    pub fn object_url(&self, root: &DavRoot, file_name: &str) -> Url {
        let mut segments = root.segments();
        segments.extend(self.folder.iter().cloned());
        segments.push(file_name.to_string());
        self.build_url(&segments, false)
    }

    fn build_url(&self, segments: &[String], collection: bool) -> Url {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        // `parsed_base_url` rejected cannot-be-a-base URLs, so this succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments.iter().map(String::as_str));
            if collection {
                path.push("");
            }
        }
        url
    }
}
