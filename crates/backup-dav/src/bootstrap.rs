//! Backup folder creation.

use crate::client::{DavClient, Depth, PROBE_BODY};
use crate::resolver::{DavRoot, EndpointProfile};
use crate::{Result, StoreError};
use log::{debug, info};
use reqwest::StatusCode;

/// Make sure the backup folder exists below `root`.
///
/// A depth-0 PROPFIND on the folder short-circuits the common case. Otherwise
/// each level is created with MKCOL, outermost first. "Already exists"
/// answers (405, and 409 from servers that report it that way) count as
/// success, so calling this repeatedly or concurrently is harmless.
pub async fn ensure_folder(
    client: &DavClient,
    profile: &EndpointProfile,
    root: &DavRoot,
) -> Result<()> {
    if profile.folder().is_empty() {
        return Ok(());
    }

    let folder_url = profile.folder_url(root);
    let response = client.propfind(&folder_url, Depth::Zero, PROBE_BODY).await?;
    let status = response.status();
    if status.is_success() {
        debug!("Backup folder {} exists", folder_url);
        return Ok(());
    }
    if is_auth_status(status) {
        return Err(StoreError::Bootstrap {
            path: folder_url.path().to_string(),
            status,
        });
    }

    for level in profile.folder_chain(root) {
        let status = client.mkcol(&level).await?.status();
        match status {
            s if s.is_success() => info!("Created folder {}", level.path()),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::CONFLICT => {
                debug!("Folder {} already present (HTTP {})", level.path(), status)
            }
            _ => {
                return Err(StoreError::Bootstrap {
                    path: level.path().to_string(),
                    status,
                })
            }
        }
    }
    Ok(())
}

fn is_auth_status(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}
