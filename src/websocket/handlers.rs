use axum::{
    extract::{
        Query, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::AppState;
use crate::services::directory;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Browsers cannot set headers on a websocket handshake, so the token may
/// also arrive as `?token=`.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let token = query
        .token
        .or_else(|| bearer.map(|TypedHeader(auth)| auth.token().to_string()))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let user_id = authorize_socket(&state, &token).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

/// Same gate as the HTTP middleware: a valid token for an account that
/// still exists.
async fn authorize_socket(state: &AppState, token: &str) -> Result<String, StatusCode> {
    let user_id = state
        .jwt_service
        .extract_user_id(token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let exists = directory::user_exists(&state.db, &user_id)
        .await
        .map_err(|e| {
            tracing::error!("Socket auth lookup failed for {}: {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if !exists {
        tracing::debug!("Refusing socket for removed user {}", user_id);
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(user_id)
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    super::connection::handle_connection(socket, user_id, state).await;
}
