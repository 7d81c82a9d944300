use thiserror::Error;

/// Errors that can occur when encoding or decoding backup metadata.
#[derive(Debug, Error)]
pub enum Error {
    /// The sidecar document is not valid JSON.
    #[error("sidecar is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The sidecar document is valid JSON but not an object.
    #[error("sidecar is not a JSON object")]
    NotAnObject,

    /// The sidecar document carries no usable backup id.
    #[error("sidecar has no backup id")]
    MissingId,

    /// A backup id cannot be used to derive remote object names.
    #[error("invalid backup id {id:?}: {reason}")]
    InvalidId {
        /// The rejected id.
        id: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Result type for backup-format operations.
pub type Result<T> = std::result::Result<T, Error>;
