//! Request-level messaging operations: send (persist, then broadcast),
//! history for a caller, and read acknowledgements.

use std::collections::{HashMap, HashSet};

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::database::DbPool;
use crate::models::message::{FormattedMessage, Message, MessageEvent, MessageKind, NewMessage};
use crate::models::profile::{NamedEntity, UnknownSender, UserProfile};
use crate::services::directory;
use crate::services::message_store::{self, HistoryQuery};
use crate::utils::error::{AppError, AppResult};
use crate::utils::retry::{RetryPolicy, retry_read};
use crate::utils::validation::{validate_identifier, validate_message_content};
use crate::websocket::events::ServerMessage;
use crate::websocket::rooms::{Room, RoomRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub conversation_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub before: Option<String>,
}

fn parse_kind(kind: Option<&str>) -> AppResult<MessageKind> {
    let kind = kind.ok_or_else(|| AppError::BadRequest("Missing parameters".to_string()))?;
    MessageKind::parse(kind).ok_or_else(|| {
        AppError::BadRequest("Invalid type. Must be 'dm' or 'community'".to_string())
    })
}

fn required<'a>(field: &str, value: Option<&'a str>) -> AppResult<&'a str> {
    let value = value.ok_or_else(|| AppError::BadRequest("Missing parameters".to_string()))?;
    validate_identifier(field, value)?;
    Ok(value)
}

/// Checks that `sender_id` may post into the conversation.
async fn authorize_send(
    pool: &DbPool,
    sender_id: &str,
    kind: MessageKind,
    conversation_id: &str,
) -> AppResult<()> {
    match kind {
        MessageKind::Direct => {
            if conversation_id == sender_id {
                return Err(AppError::Validation(
                    "Cannot send a message to yourself".to_string(),
                ));
            }
            if !directory::user_exists(pool, conversation_id).await? {
                return Err(AppError::NotFound("Recipient not found".to_string()));
            }
            if !directory::are_connected(pool, sender_id, conversation_id).await? {
                return Err(AppError::Forbidden(
                    "You are not connected with this user".to_string(),
                ));
            }
            Ok(())
        }
        MessageKind::Group => directory::require_member(pool, conversation_id, sender_id).await,
    }
}

/// Persists the message, then publishes it to the recipient's or the
/// community's room. A delivery problem never fails the send: once the
/// store accepted the message it is durable.
pub async fn send_message(
    pool: &DbPool,
    rooms: &RoomRegistry,
    sender_id: &str,
    request: SendMessageRequest,
) -> AppResult<FormattedMessage> {
    let kind = parse_kind(request.kind.as_deref())?;
    let conversation_id = required("conversationId", request.conversation_id.as_deref())?;
    let text = request
        .text
        .ok_or_else(|| AppError::BadRequest("Missing parameters".to_string()))?;
    validate_message_content(&text)?;

    authorize_send(pool, sender_id, kind, conversation_id).await?;

    let sender = directory::find_profile(pool, sender_id).await?;
    let sender: &dyn NamedEntity = match &sender {
        Some(profile) => profile,
        None => &UnknownSender,
    };

    let new_message = match kind {
        MessageKind::Direct => NewMessage::direct(sender_id, conversation_id, text),
        MessageKind::Group => NewMessage::group(sender_id, conversation_id, text),
    };

    let room = Room::for_target(kind, conversation_id);

    let message = {
        let _order = rooms.sequence(&room).await;
        let message = message_store::append(pool, new_message).await?;
        if kind == MessageKind::Group {
            // Sockets stay subscribed after their user leaves the community.
            let members: HashSet<String> = directory::member_ids(pool, conversation_id)
                .await?
                .into_iter()
                .collect();
            rooms.retain_users(&room, &members).await;
        }
        let event = ServerMessage::NewMessage(MessageEvent::new(&message, sender));
        let delivered = rooms.publish(&room, event).await;
        tracing::debug!(
            "Message {} published to {} ({} live connection(s))",
            message.id,
            room,
            delivered
        );
        message
    };

    Ok(FormattedMessage::new(&message, sender, sender_id))
}

/// History for the caller, oldest first. Every returned message addressed
/// to the caller is acknowledged as read.
pub async fn fetch_history(
    pool: &DbPool,
    caller_id: &str,
    params: HistoryParams,
    page_limit: i64,
    retry: RetryPolicy,
) -> AppResult<Vec<FormattedMessage>> {
    let kind = parse_kind(params.kind.as_deref())?;
    let conversation_id = required("conversationId", params.conversation_id.as_deref())?;

    let query = HistoryQuery {
        kind,
        counterpart: conversation_id.to_string(),
        caller_id: caller_id.to_string(),
        limit: params.limit.unwrap_or(page_limit).clamp(1, page_limit),
        before: params.before,
    };

    let messages = retry_read(retry, || message_store::history(pool, &query)).await?;

    let unread: Vec<String> = messages
        .iter()
        .filter(|m| m.is_addressed_to(caller_id) && !m.is_read_by(caller_id))
        .map(|m| m.id.clone())
        .collect();
    if !unread.is_empty() {
        let acknowledged = message_store::mark_read_many(pool, &unread, caller_id).await?;
        tracing::debug!("{} acknowledged {} message(s)", caller_id, acknowledged);
    }

    let senders = load_senders(pool, &messages).await?;

    Ok(messages
        .iter()
        .map(|m| {
            let sender: &dyn NamedEntity = match senders.get(&m.sender_id) {
                Some(profile) => profile,
                None => &UnknownSender,
            };
            FormattedMessage::new(m, sender, caller_id)
        })
        .collect())
}

async fn load_senders(
    pool: &DbPool,
    messages: &[Message],
) -> AppResult<HashMap<String, UserProfile>> {
    let ids: HashSet<&str> = messages.iter().map(|m| m.sender_id.as_str()).collect();
    let profiles = try_join_all(ids.into_iter().map(|id| directory::find_profile(pool, id))).await?;

    Ok(profiles
        .into_iter()
        .flatten()
        .map(|p| (p.id.clone(), p))
        .collect())
}

/// Explicit acknowledgement of one message by one of its receivers.
pub async fn acknowledge(pool: &DbPool, message_id: &str, caller_id: &str) -> AppResult<()> {
    let message = message_store::get_message(pool, message_id).await?;

    match message.kind {
        MessageKind::Direct => {
            if message.recipient_id.as_deref() != Some(caller_id) {
                return Err(AppError::Forbidden(
                    "Only the recipient can acknowledge this message".to_string(),
                ));
            }
        }
        MessageKind::Group => {
            let community_id = message.community_id.as_deref().unwrap_or_default();
            directory::require_member(pool, community_id, caller_id).await?;
        }
    }

    message_store::mark_read(pool, message_id, caller_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversations;
    use crate::services::directory::fixtures::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    const T0: &str = "2026-01-01T00:00:00.000000Z";

    async fn seeded() -> DbPool {
        let pool = memory_pool().await;
        for (id, name) in [("a", "Asha"), ("b", "Bilal"), ("c", "Chen"), ("x", "Xavier")] {
            add_user(&pool, id, name, T0).await;
        }
        connect(&pool, "a", "b", T0).await;
        add_community(&pool, "g", "Clean Water", "a", T0).await;
        for member in ["a", "b", "c"] {
            join(&pool, "g", member, T0).await;
        }
        pool
    }

    fn send(kind: &str, to: &str, text: &str) -> SendMessageRequest {
        SendMessageRequest {
            conversation_id: Some(to.to_string()),
            kind: Some(kind.to_string()),
            text: Some(text.to_string()),
        }
    }

    fn history_of(kind: &str, id: &str) -> HistoryParams {
        HistoryParams {
            conversation_id: Some(id.to_string()),
            kind: Some(kind.to_string()),
            limit: None,
            before: None,
        }
    }

    #[tokio::test]
    async fn direct_send_reaches_recipient_room_and_clears_unread_on_open() {
        let pool = seeded().await;
        let rooms = RoomRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        rooms
            .join(&Room::User("b".to_string()), Uuid::new_v4(), "b", tx)
            .await;

        let sent = send_message(&pool, &rooms, "a", send("dm", "b", "hi"))
            .await
            .unwrap();
        assert!(sent.is_me);
        assert_eq!(sent.sender_name, "Asha");

        match rx.recv().await {
            Some(ServerMessage::NewMessage(event)) => {
                assert_eq!(event.text, "hi");
                assert_eq!(event.conversation_id, "a");
                assert_eq!(event.id, sent.id);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let before = conversations::list_direct(&pool, "b").await.unwrap();
        assert_eq!(before[0].unread_count, 1);
        assert_eq!(before[0].last_message, "hi");

        let history = fetch_history(&pool, "b", history_of("dm", "a"), 50, RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].is_me);

        let after = conversations::list_direct(&pool, "b").await.unwrap();
        assert_eq!(after[0].unread_count, 0);
    }

    #[tokio::test]
    async fn group_send_is_broadcast_once_to_community_room() {
        let pool = seeded().await;
        let rooms = RoomRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        rooms
            .join(&Room::Community("g".to_string()), Uuid::new_v4(), "c", tx)
            .await;

        let sent = send_message(&pool, &rooms, "a", send("community", "g", "hello all"))
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(ServerMessage::NewMessage(e)) if e.id == sent.id));
        assert!(rx.try_recv().is_err());

        let seen = fetch_history(&pool, "c", history_of("community", "g"), 50, RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].text, "hello all");

        let outsider =
            fetch_history(&pool, "x", history_of("community", "g"), 50, RetryPolicy::default()).await;
        assert!(matches!(outsider, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn member_removed_after_joining_room_stops_receiving() {
        let pool = seeded().await;
        let rooms = RoomRegistry::new();
        let room = Room::Community("g".to_string());
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();
        rooms.join(&room, Uuid::new_v4(), "b", tx_b).await;
        rooms.join(&room, Uuid::new_v4(), "c", tx_c).await;

        leave(&pool, "g", "b").await;
        let sent = send_message(&pool, &rooms, "a", send("community", "g", "members only"))
            .await
            .unwrap();

        assert_eq!(
            rx_b.recv().await,
            Some(ServerMessage::Left {
                room: "community_g".to_string()
            })
        );
        assert!(rx_b.try_recv().is_err());
        assert!(matches!(rx_c.recv().await, Some(ServerMessage::NewMessage(e)) if e.id == sent.id));
        assert_eq!(rooms.subscriber_count(&room).await, 1);
    }

    #[tokio::test]
    async fn send_persists_even_without_listeners() {
        let pool = seeded().await;
        let rooms = RoomRegistry::new();

        let sent = send_message(&pool, &rooms, "a", send("dm", "b", "anyone?"))
            .await
            .unwrap();
        assert!(message_store::find_message(&pool, &sent.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn send_rejects_bad_requests() {
        let pool = seeded().await;
        let rooms = RoomRegistry::new();

        let missing = SendMessageRequest {
            conversation_id: Some("b".to_string()),
            kind: Some("dm".to_string()),
            text: None,
        };
        assert!(matches!(
            send_message(&pool, &rooms, "a", missing).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            send_message(&pool, &rooms, "a", send("dm", "b", "   ")).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            send_message(&pool, &rooms, "a", send("sms", "b", "hi")).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            send_message(&pool, &rooms, "a", send("dm", "ghost", "hi")).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            send_message(&pool, &rooms, "a", send("dm", "c", "hi")).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            send_message(&pool, &rooms, "x", send("community", "g", "hi")).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn text_is_returned_verbatim() {
        let pool = seeded().await;
        let rooms = RoomRegistry::new();
        let raw = "<script>alert('x')</script> & \"hello\"";

        send_message(&pool, &rooms, "a", send("dm", "b", raw))
            .await
            .unwrap();
        let history = fetch_history(&pool, "a", history_of("dm", "b"), 50, RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(history[0].text, raw);
    }

    #[tokio::test]
    async fn acknowledge_only_by_receivers() {
        let pool = seeded().await;
        let rooms = RoomRegistry::new();
        let dm = send_message(&pool, &rooms, "a", send("dm", "b", "hi"))
            .await
            .unwrap();
        let group = send_message(&pool, &rooms, "a", send("community", "g", "all"))
            .await
            .unwrap();

        acknowledge(&pool, &dm.id, "b").await.unwrap();
        acknowledge(&pool, &dm.id, "b").await.unwrap();
        assert!(matches!(
            acknowledge(&pool, &dm.id, "c").await,
            Err(AppError::Forbidden(_))
        ));

        acknowledge(&pool, &group.id, "c").await.unwrap();
        assert!(matches!(
            acknowledge(&pool, &group.id, "x").await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            acknowledge(&pool, "missing", "b").await,
            Err(AppError::NotFound(_))
        ));

        let stored = message_store::get_message(&pool, &group.id).await.unwrap();
        assert!(stored.is_read_by("c"));
        assert!(!stored.is_read_by("b"));
    }
}
