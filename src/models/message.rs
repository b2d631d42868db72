use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::profile::NamedEntity;

/// Which side of the messaging surface a message or conversation lives on.
///
/// The wire names (`dm`, `community`) are what browsers send; the stored
/// names (`direct`, `group`) are what the `messages.kind` column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum MessageKind {
    #[serde(rename = "dm")]
    #[sqlx(rename = "direct")]
    Direct,
    #[serde(rename = "community")]
    #[sqlx(rename = "group")]
    Group,
}

impl MessageKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dm" | "direct" => Some(MessageKind::Direct),
            "community" | "group" => Some(MessageKind::Group),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            MessageKind::Direct => "dm",
            MessageKind::Group => "community",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub community_id: Option<String>,
    pub content: String,
    pub created_at: String,
    #[sqlx(skip)]
    pub read_by: Vec<String>,
}

impl Message {
    /// Whether `user_id` is an intended receiver of this message. Group
    /// membership is checked by the caller; here any non-sender qualifies.
    pub fn is_addressed_to(&self, user_id: &str) -> bool {
        match self.kind {
            MessageKind::Direct => self.recipient_id.as_deref() == Some(user_id),
            MessageKind::Group => self.sender_id != user_id,
        }
    }

    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|r| r == user_id)
    }

    /// The id other clients address this conversation by, seen from the
    /// receiving side: the sender for direct, the community for group.
    pub fn conversation_key_for_receiver(&self) -> &str {
        match self.kind {
            MessageKind::Direct => &self.sender_id,
            MessageKind::Group => self.community_id.as_deref().unwrap_or_default(),
        }
    }
}

/// Input to the message store. Exactly one of `recipient_id` and
/// `community_id` must be set, matching `kind`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub kind: MessageKind,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub community_id: Option<String>,
    pub content: String,
}

impl NewMessage {
    pub fn direct(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Direct,
            sender_id: sender_id.into(),
            recipient_id: Some(recipient_id.into()),
            community_id: None,
            content: content.into(),
        }
    }

    pub fn group(
        sender_id: impl Into<String>,
        community_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Group,
            sender_id: sender_id.into(),
            recipient_id: None,
            community_id: Some(community_id.into()),
            content: content.into(),
        }
    }
}

/// A message as rendered for one particular caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_initial: String,
    pub text: String,
    pub timestamp: String,
    pub is_me: bool,
}

impl FormattedMessage {
    pub fn new(message: &Message, sender: &dyn NamedEntity, caller_id: &str) -> Self {
        Self {
            id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            sender_name: sender.display_name(),
            sender_initial: sender.initial(),
            text: message.content.clone(),
            timestamp: message.created_at.clone(),
            is_me: message.sender_id == caller_id,
        }
    }
}

/// Broadcast payload. `isMe` is receiver-relative, so it is left for the
/// receiving client to compute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_initial: String,
    pub text: String,
    pub timestamp: String,
    pub conversation_id: String,
    #[serde(rename = "conversationType")]
    pub kind: MessageKind,
}

impl MessageEvent {
    pub fn new(message: &Message, sender: &dyn NamedEntity) -> Self {
        Self {
            id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            sender_name: sender.display_name(),
            sender_initial: sender.initial(),
            text: message.content.clone(),
            timestamp: message.created_at.clone(),
            conversation_id: message.conversation_key_for_receiver().to_string(),
            kind: message.kind,
        }
    }

    pub fn for_viewer(&self, viewer_id: &str) -> FormattedMessage {
        FormattedMessage {
            id: self.id.clone(),
            sender_id: self.sender_id.clone(),
            sender_name: self.sender_name.clone(),
            sender_initial: self.sender_initial.clone(),
            text: self.text.clone(),
            timestamp: self.timestamp.clone(),
            is_me: self.sender_id == viewer_id,
        }
    }
}
