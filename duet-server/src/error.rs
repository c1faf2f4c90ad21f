//! Error types for the Duet server.
//!
//! [`StoreError`] is what a [`crate::store::MessageStore`] reports;
//! [`ChatError`] is what every chat operation reports to its caller. The
//! HTTP mapping lives in [`crate::http`].

use std::time::Duration;

use duet_proto::cursor::CursorError;
use duet_proto::message::ValidationError;

/// Errors reported by a message store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested message does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The message was rejected before being written.
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationError),

    /// The backing storage cannot be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A write was attempted and failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The operation did not finish within the configured timeout.
    #[error("storage timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Returns `true` if repeating the operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::WriteFailed(_) | Self::Timeout(_)
        )
    }
}

/// Errors reported by chat operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Malformed input; nothing was changed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A referenced user or message does not exist, or is not visible to
    /// the caller.
    #[error("{0} not found")]
    NotFound(String),

    /// The pagination cursor could not be decoded.
    #[error("invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),

    /// A path identifier could not be parsed.
    #[error("malformed id: {0}")]
    MalformedId(String),

    /// Missing or unknown credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// The media host rejected or failed an upload.
    #[error("media upload failed: {0}")]
    Upload(String),

    /// The store failed in a way that may succeed on retry.
    #[error("temporarily unavailable: {0}")]
    TransientStore(StoreError),
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Invalid(e) => Self::Validation(e),
            other => Self::TransientStore(other),
        }
    }
}

impl ChatError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::InvalidCursor(_) => "invalid_cursor",
            Self::MalformedId(_) => "malformed_id",
            Self::Unauthorized => "unauthorized",
            Self::Upload(_) => "upload_failed",
            Self::TransientStore(_) => "unavailable",
        }
    }

    /// Returns `true` if repeating the request may succeed.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(self, Self::Upload(_) | Self::TransientStore(_))
    }
}
