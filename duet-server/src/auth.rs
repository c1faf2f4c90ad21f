//! Bearer-token authentication.
//!
//! Tokens are issued elsewhere; the server only maps them to user ids.

use std::collections::HashMap;

use parking_lot::RwLock;

use duet_proto::message::UserId;

use crate::config::UserSeed;
use crate::error::ChatError;

/// Maps session tokens to the user they identify.
#[derive(Default)]
pub struct Authenticator {
    tokens: RwLock<HashMap<String, UserId>>,
}

impl Authenticator {
    /// Creates an authenticator that accepts no tokens.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an authenticator accepting each seed's token.
    #[must_use]
    pub fn from_seeds(seeds: &[UserSeed]) -> Self {
        let auth = Self::new();
        for seed in seeds {
            auth.insert(seed.token.clone(), UserId::new(seed.id.clone()));
        }
        auth
    }

    /// Accepts `token` as identifying `user`.
    pub fn insert(&self, token: impl Into<String>, user: UserId) {
        self.tokens.write().insert(token.into(), user);
    }

    /// Resolves a token to its user.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Unauthorized`] if the token is blank or unknown.
    pub fn authenticate(&self, token: &str) -> Result<UserId, ChatError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ChatError::Unauthorized);
        }
        self.tokens
            .read()
            .get(token)
            .cloned()
            .ok_or(ChatError::Unauthorized)
    }

    /// Resolves an `Authorization` header value of the form `Bearer <token>`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Unauthorized`] if the header is missing, uses
    /// another scheme, or carries an unknown token.
    pub fn authenticate_header(&self, header: Option<&str>) -> Result<UserId, ChatError> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(ChatError::Unauthorized)?;
        self.authenticate(token)
    }
}
