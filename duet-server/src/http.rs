//! JSON request/response binding of the chat operations.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use duet_proto::api::{
    ErrorBody, FavouriteResponse, PageResponse, ReactionResponse, ToggleReactionRequest,
};
use duet_proto::message::{Message, MessageId, NewMessage, UserId};
use duet_proto::user::UserSummary;

use crate::error::ChatError;
use crate::state::AppState;
use crate::store::MessageStore;

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) | Self::InvalidCursor(_) | Self::MalformedId(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upload(_) => StatusCode::BAD_GATEWAY,
            Self::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
            retryable: self.retryable(),
        };
        (status, Json(body)).into_response()
    }
}

/// Query string of a history request.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    /// Older-than boundary; absent for the newest page.
    pub cursor: Option<String>,
    /// Requested page size.
    pub limit: Option<usize>,
}

fn caller<S: MessageStore>(state: &AppState<S>, headers: &HeaderMap) -> Result<UserId, ChatError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    state.auth.authenticate_header(header)
}

pub(crate) async fn health() -> &'static str {
    "ok"
}

pub(crate) async fn list_users<S: MessageStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> Result<Json<Vec<UserSummary>>, ChatError> {
    let me = caller(&state, &headers)?;
    Ok(Json(state.list_partners(&me)))
}

pub(crate) async fn get_messages<S: MessageStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(partner): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PageResponse>, ChatError> {
    let me = caller(&state, &headers)?;
    let page = state
        .fetch_page(
            &me,
            &UserId::new(partner),
            query.cursor.as_deref(),
            query.limit,
        )
        .await?;
    Ok(Json(page))
}

pub(crate) async fn send_message<S: MessageStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(receiver): Path<String>,
    Json(draft): Json<NewMessage>,
) -> Result<(StatusCode, Json<Message>), ChatError> {
    let me = caller(&state, &headers)?;
    let message = state
        .send_message(&me, &UserId::new(receiver), draft)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub(crate) async fn toggle_reaction<S: MessageStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ToggleReactionRequest>,
) -> Result<Json<ReactionResponse>, ChatError> {
    let me = caller(&state, &headers)?;
    let id: MessageId = id.parse().map_err(|_| ChatError::MalformedId(id))?;
    let response = state.toggle_reaction(&me, &id, &request.emoji).await?;
    Ok(Json(response))
}

pub(crate) async fn toggle_favourite<S: MessageStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(target): Path<String>,
) -> Result<Json<FavouriteResponse>, ChatError> {
    let me = caller(&state, &headers)?;
    Ok(Json(state.toggle_favourite(&me, &UserId::new(target))?))
}
