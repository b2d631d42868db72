use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::{ClientMessage, ServerMessage};
use super::rooms::{ConnectionId, Outbox, Room};
use crate::api::AppState;
use crate::services::directory;

/// Drives one authenticated socket until either side hangs up.
pub async fn handle_connection(socket: WebSocket, user_id: String, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<ServerMessage>();
    let connection_id = Uuid::new_v4();

    state
        .rooms
        .join(
            &Room::User(user_id.clone()),
            connection_id,
            &user_id,
            outbox.clone(),
        )
        .await;
    let _ = outbox.send(ServerMessage::Connected {
        user_id: user_id.clone(),
    });

    tracing::info!("Socket {} opened for user {}", connection_id, user_id);

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Failed to encode socket event: {}", e),
            }
        }
    });

    let recv_state = state.clone();
    let recv_user = user_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => {
                        handle_client_message(
                            &recv_state,
                            &recv_user,
                            connection_id,
                            &outbox,
                            client_msg,
                        )
                        .await
                    }
                    Err(e) => {
                        let _ = outbox.send(ServerMessage::Error {
                            message: format!("Unrecognized frame: {}", e),
                        });
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.rooms.leave_all(connection_id).await;
    tracing::info!("Socket {} closed for user {}", connection_id, user_id);
}

async fn handle_client_message(
    state: &AppState,
    user_id: &str,
    connection_id: ConnectionId,
    outbox: &Outbox,
    message: ClientMessage,
) {
    let reply = match message {
        ClientMessage::Join { user_id: requested } => {
            if requested != user_id {
                ServerMessage::Error {
                    message: "Cannot join another user's room".to_string(),
                }
            } else {
                let room = Room::User(requested);
                state
                    .rooms
                    .join(&room, connection_id, user_id, outbox.clone())
                    .await;
                ServerMessage::Joined { room: room.key() }
            }
        }
        ClientMessage::JoinCommunity { community_id } => {
            match directory::require_member(&state.db, &community_id, user_id).await {
                Ok(()) => {
                    let room = Room::Community(community_id);
                    state
                        .rooms
                        .join(&room, connection_id, user_id, outbox.clone())
                        .await;
                    ServerMessage::Joined { room: room.key() }
                }
                Err(e) => {
                    tracing::debug!("Rejected joinCommunity from {}: {}", user_id, e);
                    ServerMessage::Error {
                        message: e.to_string(),
                    }
                }
            }
        }
        ClientMessage::LeaveCommunity { community_id } => {
            let room = Room::Community(community_id);
            state.rooms.leave(&room, connection_id).await;
            ServerMessage::Left { room: room.key() }
        }
        ClientMessage::Heartbeat => ServerMessage::Pong,
    };

    let _ = outbox.send(reply);
}
