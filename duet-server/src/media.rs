//! Image upload seam.
//!
//! Drafts may carry an image as a data URL, raw base64 or an existing URL.
//! A [`MediaUploader`] turns that into the URL stored on the message.

use futures_util::future::BoxFuture;

/// Returned when the media host cannot take an upload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upload failed: {0}")]
pub struct UploadError(pub String);

/// Stores an image payload and returns where it can be fetched from.
pub trait MediaUploader: Send + Sync {
    /// Uploads `payload`, returning its public URL.
    fn upload<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<String, UploadError>>;
}

/// Uploader that keeps the payload as its own URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughUploader;

impl MediaUploader for PassthroughUploader {
    fn upload<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<String, UploadError>> {
        Box::pin(async move { Ok(payload.trim().to_string()) })
    }
}
