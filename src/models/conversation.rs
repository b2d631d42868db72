use serde::{Deserialize, Serialize};

use crate::models::message::MessageKind;

pub const EMPTY_DIRECT_PREVIEW: &str = "Start a conversation";
pub const EMPTY_GROUP_PREVIEW: &str = "Welcome to the community!";

/// Derived per-caller view of one direct or group conversation. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub display_name: String,
    pub initial: String,
    pub last_message: String,
    pub last_message_at: Option<String>,
    pub unread_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<i64>,
    #[serde(default)]
    pub online: bool,
    /// When the underlying connection or membership began; orders
    /// conversations that have no messages yet.
    #[serde(skip)]
    pub relationship_since: String,
}

/// Which list the conversation panel is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationTab {
    Messages,
    Communities,
}

impl ConversationTab {
    pub fn kind(&self) -> MessageKind {
        match self {
            ConversationTab::Messages => MessageKind::Direct,
            ConversationTab::Communities => MessageKind::Group,
        }
    }
}
