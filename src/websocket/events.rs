use serde::{Deserialize, Serialize};

use crate::models::message::MessageEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Join { user_id: String },
    #[serde(rename_all = "camelCase")]
    JoinCommunity { community_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveCommunity { community_id: String },
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Connected { user_id: String },
    Joined { room: String },
    Left { room: String },
    NewMessage(MessageEvent),
    Error { message: String },
    Pong,
}
