//! Stateless pagination cursor over a conversation's history.
//!
//! A [`Cursor`] is an exclusive upper bound: "messages strictly older than
//! this timestamp". It is derived solely from the oldest message of the
//! previous page, so re-requesting the same cursor always selects the same
//! range. The wire form is the decimal millisecond value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::message::Timestamp;

/// Errors produced when decoding a cursor that is present but unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    /// The cursor parameter was present but empty.
    #[error("cursor is empty")]
    Empty,
    /// The cursor does not decode to a timestamp.
    #[error("malformed cursor: {0:?}")]
    Malformed(String),
}

/// Opaque "older than" pagination boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Cursor(Timestamp);

impl Cursor {
    /// Builds the cursor that selects messages older than `timestamp`.
    #[must_use]
    pub const fn before(timestamp: Timestamp) -> Self {
        Self(timestamp)
    }

    /// The exclusive upper bound carried by this cursor.
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        self.0
    }

    /// Encodes the cursor to its wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        self.0.as_millis().to_string()
    }

    /// Decodes a cursor from its wire form.
    ///
    /// Only plain ASCII digits are accepted; signs, whitespace and values
    /// beyond `u64::MAX` are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Empty`] for an empty string and
    /// [`CursorError::Malformed`] for anything that is not a timestamp.
    pub fn decode(raw: &str) -> Result<Self, CursorError> {
        if raw.is_empty() {
            return Err(CursorError::Empty);
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CursorError::Malformed(raw.to_string()));
        }
        raw.parse::<u64>()
            .map(|millis| Self(Timestamp::from_millis(millis)))
            .map_err(|_| CursorError::Malformed(raw.to_string()))
    }

    /// Decodes an optional cursor parameter.
    ///
    /// `None` means "first page" and is not an error; a present value must
    /// decode, so callers can tell a fresh start from corrupt state.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError`] if `raw` is present but does not decode.
    pub fn decode_optional(raw: Option<&str>) -> Result<Option<Self>, CursorError> {
        raw.map(Self::decode).transpose()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Cursor {
    type Err = CursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl From<Cursor> for String {
    fn from(cursor: Cursor) -> Self {
        cursor.encode()
    }
}

impl TryFrom<String> for Cursor {
    type Error = CursorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value)
    }
}
