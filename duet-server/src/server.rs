//! Router assembly, WebSocket event stream and server startup.
//!
//! Each WebSocket connection is one authenticated participant. Its socket
//! is split into a writer task, which drains the connection's outbound
//! channel, and a reader task, which decodes and handles inbound events one
//! at a time. When either side finishes the other is aborted and the
//! participant is removed from presence.

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use duet_proto::codec;
use duet_proto::event::ServerEvent;
use duet_proto::message::UserId;

use crate::http;
use crate::presence::ConnectionHandle;
use crate::state::AppState;
use crate::store::MessageStore;

/// Builds the HTTP and WebSocket routes over `state`.
pub fn router<S: MessageStore + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/api/users", get(http::list_users::<S>))
        .route("/api/users/{id}/favourite", put(http::toggle_favourite::<S>))
        .route(
            "/api/messages/{id}",
            get(http::get_messages::<S>).post(http::send_message::<S>),
        )
        .route("/api/messages/{id}/reactions", post(http::toggle_reaction::<S>))
        .route("/ws", get(ws_handler::<S>))
        .with_state(state)
}

/// Starts the server with a pre-built [`AppState`].
///
/// Returns the bound address (useful with port `0`) and the serving task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state<S: MessageStore + 'static>(
    addr: &str,
    state: Arc<AppState<S>>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Query string of the WebSocket handshake.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Session token identifying the caller.
    pub token: Option<String>,
}

async fn ws_handler<S: MessageStore + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<WsParams>,
) -> Response {
    let user = match state
        .auth
        .authenticate(params.token.as_deref().unwrap_or_default())
    {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    let max_frame = state.config.max_frame_size;
    ws.max_message_size(max_frame)
        .on_upgrade(move |socket| handle_socket(socket, state, user))
}

/// Serves one participant's event stream until either side closes.
pub async fn handle_socket<S: MessageStore + 'static>(
    socket: WebSocket,
    state: Arc<AppState<S>>,
    user: UserId,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let handle = ConnectionHandle::new(tx);
    let connection = handle.id();
    let reply = handle.clone();

    state.connect(&user, handle);

    let writer_user = user.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let bytes = match codec::encode_server(&event) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(user_id = %writer_user, event = event.name(), error = %e, "failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(WsMessage::Binary(bytes.into())).await.is_err() {
                tracing::warn!(user_id = %writer_user, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_user = user.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                WsMessage::Binary(data) => match codec::decode_client(&data) {
                    Ok(event) => reader_state.handle_client_event(&reader_user, event).await,
                    Err(e) => {
                        tracing::warn!(user_id = %reader_user, error = %e, "failed to decode client event");
                        reply.send(ServerEvent::Error {
                            reason: format!("undecodable event: {e}"),
                        });
                    }
                },
                WsMessage::Close(_) => {
                    tracing::debug!(user_id = %reader_user, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.disconnect(&user, connection);
}

#[cfg(test)]
pub(crate) async fn start_test_server() -> (
    std::net::SocketAddr,
    tokio::task::JoinHandle<()>,
    Arc<AppState>,
) {
    use crate::config::{ServerConfig, UserSeed};

    let users = ["alice", "bob"]
        .into_iter()
        .map(|id| UserSeed {
            id: id.into(),
            full_name: id.into(),
            email: String::new(),
            profile_pic: String::new(),
            token: format!("{id}-token"),
        })
        .collect();
    let state = Arc::new(AppState::in_memory(ServerConfig {
        users,
        ..ServerConfig::default()
    }));
    let (addr, handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test server");
    (addr, handle, state)
}
