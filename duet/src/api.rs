//! Request-style operations against the Duet server.
//!
//! [`ApiClient`] is the seam the session talks through; [`HttpApi`] is the
//! reqwest implementation. Failing responses carry the server's
//! [`ErrorBody`] so callers can tell terminal errors from retryable ones.

use std::future::Future;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use duet_proto::api::{
    ErrorBody, FavouriteResponse, PageResponse, ReactionResponse, ToggleReactionRequest,
};
use duet_proto::cursor::Cursor;
use duet_proto::message::{Message, MessageId, NewMessage, UserId};
use duet_proto::user::UserSummary;

/// Errors from a request to the server.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(String),

    /// The server answered with an error status.
    #[error("server rejected request ({status}): {}", .body.error)]
    Status {
        /// HTTP status code.
        status: u16,
        /// Decoded error body.
        body: ErrorBody,
    },

    /// The response body did not decode.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// The configured server URL cannot address API paths.
    #[error("invalid server url: {0}")]
    BadUrl(String),
}

impl ApiError {
    /// Whether repeating the request may succeed.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { body, .. } => body.retryable,
            Self::Decode(_) | Self::BadUrl(_) => false,
        }
    }

    /// The server's machine-readable error code, if it sent one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(&body.code),
            _ => None,
        }
    }
}

/// Request-style chat operations, authenticated as one user.
pub trait ApiClient: Send + Sync {
    /// Everyone the caller can talk to.
    fn list_partners(&self) -> impl Future<Output = Result<Vec<UserSummary>, ApiError>> + Send;

    /// One page of the conversation with `partner`, oldest first.
    fn fetch_page(
        &self,
        partner: &UserId,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> impl Future<Output = Result<PageResponse, ApiError>> + Send;

    /// Sends a message to `receiver` and returns it as stored.
    fn send_message(
        &self,
        receiver: &UserId,
        draft: &NewMessage,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    /// Toggles the caller's `emoji` on a message.
    fn toggle_reaction(
        &self,
        id: &MessageId,
        emoji: &str,
    ) -> impl Future<Output = Result<ReactionResponse, ApiError>> + Send;

    /// Toggles whether `user` is one of the caller's favourites.
    fn toggle_favourite(
        &self,
        user: &UserId,
    ) -> impl Future<Output = Result<FavouriteResponse, ApiError>> + Send;
}

/// [`ApiClient`] over HTTP with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpApi {
    /// Builds a client for the server at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the HTTP client cannot be built,
    /// or [`ApiError::BadUrl`] if `base` cannot carry a path.
    pub fn new(base: Url, token: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        if base.cannot_be_a_base() {
            return Err(ApiError::BadUrl(base.to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base,
            token: token.into(),
        })
    }

    /// Full URL of an API path, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::BadUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.token)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await.map_err(|e| {
            tracing::warn!(error = %e, "request failed");
            ApiError::Transport(e.to_string())
        })?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()));
        }
        let body = response
            .json::<ErrorBody>()
            .await
            .unwrap_or_else(|_| fallback_body(status));
        tracing::debug!(status = status.as_u16(), code = %body.code, "request rejected");
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Error body for responses that did not carry one.
fn fallback_body(status: StatusCode) -> ErrorBody {
    ErrorBody {
        error: status.to_string(),
        code: "unknown".to_string(),
        retryable: status.is_server_error(),
    }
}

impl ApiClient for HttpApi {
    async fn list_partners(&self) -> Result<Vec<UserSummary>, ApiError> {
        let url = self.endpoint(&["api", "users"])?;
        self.execute(self.request(Method::GET, url)).await
    }

    async fn fetch_page(
        &self,
        partner: &UserId,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<PageResponse, ApiError> {
        let mut url = self.endpoint(&["api", "messages", partner.as_str()])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", &cursor.encode());
            }
        }
        self.execute(self.request(Method::GET, url)).await
    }

    async fn send_message(&self, receiver: &UserId, draft: &NewMessage) -> Result<Message, ApiError> {
        let url = self.endpoint(&["api", "messages", receiver.as_str()])?;
        self.execute(self.request(Method::POST, url).json(draft)).await
    }

    async fn toggle_reaction(&self, id: &MessageId, emoji: &str) -> Result<ReactionResponse, ApiError> {
        let id = id.to_string();
        let url = self.endpoint(&["api", "messages", &id, "reactions"])?;
        let body = ToggleReactionRequest {
            emoji: emoji.to_string(),
        };
        self.execute(self.request(Method::POST, url).json(&body)).await
    }

    async fn toggle_favourite(&self, user: &UserId) -> Result<FavouriteResponse, ApiError> {
        let url = self.endpoint(&["api", "users", user.as_str(), "favourite"])?;
        self.execute(self.request(Method::PUT, url)).await
    }
}
