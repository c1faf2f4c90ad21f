//! Serialization and deserialization for the Duet event stream.
//!
//! Provides encode/decode functions using postcard. One encoded event maps
//! to one WebSocket binary frame, so no length prefix is needed.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event::{ClientEvent, ServerEvent};

/// Maximum size of a single encoded frame (64 KB of text, 16 KB of image
/// reference, plus overhead).
pub const MAX_FRAME_SIZE: usize = 96 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let bytes = postcard::to_allocvec(value).map_err(|e| CodecError::Serialization(e.to_string()))?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ServerEvent`] into a frame.
///
/// # Errors
///
/// Returns [`CodecError`] if the event cannot be serialized or is too large.
pub fn encode_server(event: &ServerEvent) -> Result<Vec<u8>, CodecError> {
    encode(event)
}

/// Decodes a [`ServerEvent`] from a frame.
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes are not a valid server event.
pub fn decode_server(bytes: &[u8]) -> Result<ServerEvent, CodecError> {
    decode(bytes)
}

/// Encodes a [`ClientEvent`] into a frame.
///
/// # Errors
///
/// Returns [`CodecError`] if the event cannot be serialized or is too large.
pub fn encode_client(event: &ClientEvent) -> Result<Vec<u8>, CodecError> {
    encode(event)
}

/// Decodes a [`ClientEvent`] from a frame.
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes are not a valid client event.
pub fn decode_client(bytes: &[u8]) -> Result<ClientEvent, CodecError> {
    decode(bytes)
}
