//! Error types for remote calls, download management and persistence.

use thiserror::Error;
use uuid::Uuid;

/// Coarse classification used by the replay engine to decide whether a
/// failed remote call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connectivity or timeout; the event is requeued.
    Network,
    /// The server rejected the request (auth, not found, bad request,
    /// server error); the event is dead-lettered.
    Client,
    /// Anything the adapter could not classify; dead-lettered.
    Unexpected,
}

/// Failure returned by a [`crate::sync::PlaybackAuthority`] call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection refused, reset or DNS failure.
    #[error("Network error: {0}")]
    Network(String),

    /// No response within the request timeout.
    #[error("Request timed out")]
    Timeout,

    /// Missing or expired credentials.
    #[error("Unauthorized")]
    Unauthorized,

    /// Credentials lack access to the item.
    #[error("Forbidden")]
    Forbidden,

    /// The server does not know the item.
    #[error("Item not found: {0}")]
    NotFound(Uuid),

    /// The server rejected the payload.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The server failed while handling the request.
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Any other response.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl RemoteError {
    /// Retry class of this failure.
    pub fn class(&self) -> FailureClass {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout => {
                FailureClass::Network
            }
            RemoteError::Unauthorized
            | RemoteError::Forbidden
            | RemoteError::NotFound(_)
            | RemoteError::BadRequest(_)
            | RemoteError::Server { .. } => FailureClass::Client,
            RemoteError::Unexpected(_) => FailureClass::Unexpected,
        }
    }

    /// Worth retrying once connectivity returns.
    pub fn is_network(&self) -> bool {
        self.class() == FailureClass::Network
    }
}

/// Failure returned by a [`crate::reclaim::DownloadManager`] call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// No download with this id.
    #[error("Download not found: {0}")]
    NotFound(Uuid),

    /// The volume could not be queried.
    #[error("Storage query failed: {0}")]
    Storage(String),

    /// The file could not be removed.
    #[error("Delete failed for {id}: {message}")]
    DeleteFailed { id: Uuid, message: String },
}

/// Error type of the crate.
#[derive(Error, Debug)]
pub enum OfflineError {
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A document failed to encode or decode.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The slot store failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A server call failed.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A download manager call failed.
    #[error("Download manager error: {0}")]
    Download(#[from] DownloadError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result alias over [`OfflineError`].
pub type Result<T> = std::result::Result<T, OfflineError>;
