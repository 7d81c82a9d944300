use crate::spool::SpoolError;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the backup store and its components.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The supplied configuration cannot be used.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid backup id, or a descriptor that could not be encoded.
    #[error(transparent)]
    Format(#[from] backup_format::Error),

    /// No candidate DAV root answered the probe.
    #[error("no WebDAV root found at {base_url} ({})", describe_failure(.last_status, .last_error))]
    Resolution {
        base_url: String,
        last_status: Option<StatusCode>,
        last_error: Option<String>,
    },

    /// The backup folder could not be created.
    #[error("cannot create backup folder {path}: HTTP {status}")]
    Bootstrap { path: String, status: StatusCode },

    /// Local staging of the archive failed; nothing was sent to the server.
    #[error("staging backup {id} failed: {source}")]
    Spool {
        id: String,
        #[source]
        source: SpoolError,
    },

    /// The archive PUT was rejected or did not complete.
    #[error("upload of backup {id} failed ({})", describe_failure(.status, .message))]
    Upload {
        id: String,
        status: Option<StatusCode>,
        message: Option<String>,
    },

    /// No archive exists for the requested id.
    #[error("backup not found: {0}")]
    NotFound(String),

    /// Deleting one half of a backup failed with something other than 404.
    #[error("deleting {object} of backup {id} failed: HTTP {status}")]
    Delete {
        id: String,
        object: String,
        status: StatusCode,
    },

    /// The server answered an operation with an unexpected status.
    #[error("{op} {url} failed: HTTP {status}")]
    Status {
        op: &'static str,
        url: String,
        status: StatusCode,
    },

    /// A PROPFIND response body could not be parsed.
    #[error("invalid PROPFIND response: {0}")]
    Multistatus(String),

    /// The request could not be sent or its response could not be read.
    #[error("{op} request failed: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// A transfer made no progress within the stall timeout.
    #[error("{op} request stalled: no progress for {idle:?}")]
    Stalled { op: &'static str, idle: Duration },

    /// Local file I/O failed, e.g. reopening the spooled archive.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            StoreError::Resolution { last_status, .. } => *last_status,
            StoreError::Bootstrap { status, .. }
            | StoreError::Delete { status, .. }
            | StoreError::Status { status, .. } => Some(*status),
            StoreError::Upload { status, .. } => *status,
            StoreError::Transport { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Whether the server refused our credentials or permissions.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        )
    }

    pub(crate) fn transport(op: &'static str) -> impl FnOnce(reqwest::Error) -> StoreError {
        move |source| StoreError::Transport { op, source }
    }
}

fn describe_failure(status: &Option<StatusCode>, message: &Option<String>) -> String {
    match (status, message) {
        (Some(status), Some(message)) => format!("HTTP {}: {}", status, message),
        (Some(status), None) => format!("HTTP {}", status),
        (None, Some(message)) => message.clone(),
        (None, None) => "no response".to_string(),
    }
}

/// Result type for backup store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
