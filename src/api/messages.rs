use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;

use crate::api::AppState;
use crate::models::conversation::ConversationSummary;
use crate::models::message::{FormattedMessage, MessageKind};
use crate::services::conversations;
use crate::services::messaging::{self, HistoryParams, SendMessageRequest};
use crate::utils::error::AppResult;
use crate::utils::helpers::{ApiResponse, json_success, require_user_id};
use crate::utils::retry::retry_read;

type Summaries = Json<ApiResponse<Vec<ConversationSummary>>>;

/// Presence comes from the live room registry, not the store.
async fn with_presence(
    state: &AppState,
    mut summaries: Vec<ConversationSummary>,
) -> Vec<ConversationSummary> {
    for summary in summaries
        .iter_mut()
        .filter(|s| s.kind == MessageKind::Direct)
    {
        summary.online = state.rooms.is_online(&summary.id).await;
    }
    summaries
}

async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Summaries> {
    let user_id = require_user_id(&headers)?;
    let summaries = retry_read(state.config.retry_policy(), || {
        conversations::list_direct(&state.db, &user_id)
    })
    .await?;
    Ok(json_success(with_presence(&state, summaries).await))
}

async fn list_communities_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Summaries> {
    let user_id = require_user_id(&headers)?;
    let summaries = retry_read(state.config.retry_policy(), || {
        conversations::list_communities(&state.db, &user_id)
    })
    .await?;
    Ok(json_success(summaries))
}

async fn list_all_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Summaries> {
    let user_id = require_user_id(&headers)?;
    let summaries = retry_read(state.config.retry_policy(), || {
        conversations::list_conversations(&state.db, &user_id)
    })
    .await?;
    Ok(json_success(with_presence(&state, summaries).await))
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<ApiResponse<Vec<FormattedMessage>>>> {
    let user_id = require_user_id(&headers)?;
    let messages = messaging::fetch_history(
        &state.db,
        &user_id,
        params,
        state.config.history_page_limit,
        state.config.retry_policy(),
    )
    .await?;
    Ok(json_success(messages))
}

async fn send_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<ApiResponse<FormattedMessage>>> {
    let user_id = require_user_id(&headers)?;
    let message = messaging::send_message(&state.db, &state.rooms, &user_id, req).await?;
    tracing::info!("{} sent message {}", user_id, message.id);
    Ok(json_success(message))
}

async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let user_id = require_user_id(&headers)?;
    messaging::acknowledge(&state.db, &message_id, &user_id).await?;
    Ok(json_success(json!({ "messageId": message_id })))
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/conversations", get(list_conversations_handler))
        .route("/communities", get(list_communities_handler))
        .route("/communities/joined", get(list_communities_handler))
        .route("/all", get(list_all_handler))
        .route("/history", get(history_handler))
        .route("/send", post(send_handler))
        .route("/read/:message_id", post(mark_read_handler))
        .with_state(state)
}
