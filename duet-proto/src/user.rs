//! Public user views. These never carry credentials or contact secrets.

use serde::{Deserialize, Serialize};

use crate::message::{Timestamp, UserId};

/// A conversation partner as listed in the caller's sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// The partner's id.
    pub id: UserId,
    /// Display name.
    pub full_name: String,
    /// Avatar URL (may be empty).
    pub profile_pic: String,
    /// Last connect or disconnect, if ever seen.
    pub last_seen: Option<Timestamp>,
    /// Whether the caller has favourited this user.
    pub is_favourite: bool,
}

/// Display information for whoever placed a reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactorInfo {
    /// The reactor's id.
    pub id: UserId,
    /// Display name.
    pub full_name: String,
    /// Avatar URL (may be empty).
    pub profile_pic: String,
}

/// A reaction with its reactor resolved to display information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReaction {
    /// The emoji used.
    pub emoji: String,
    /// Who reacted.
    pub reactor: ReactorInfo,
}
