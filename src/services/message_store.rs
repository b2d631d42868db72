//! Durable record of every direct and group message.
//!
//! `append` is the only way new content enters the store. After that a
//! message only ever changes by gaining read acknowledgements.

use itertools::Itertools;
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use crate::database::DbPool;
use crate::models::message::{Message, MessageKind, NewMessage};
use crate::services::directory;
use crate::utils::error::{AppError, AppResult};
use crate::utils::helpers::now_timestamp;
use crate::utils::validation::validate_message_content;

#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub kind: MessageKind,
    /// The other user for direct history, the community for group history.
    pub counterpart: String,
    pub caller_id: String,
    pub limit: i64,
    /// Only return messages older than this message id.
    pub before: Option<String>,
}

fn validate_target(message: &NewMessage) -> AppResult<()> {
    let has_recipient = message
        .recipient_id
        .as_deref()
        .is_some_and(|r| !r.is_empty());
    let has_community = message
        .community_id
        .as_deref()
        .is_some_and(|c| !c.is_empty());

    match (message.kind, has_recipient, has_community) {
        (MessageKind::Direct, true, false) | (MessageKind::Group, false, true) => Ok(()),
        (MessageKind::Direct, _, _) => Err(AppError::Validation(
            "Direct messages need a recipient and no community".to_string(),
        )),
        (MessageKind::Group, _, _) => Err(AppError::Validation(
            "Group messages need a community and no recipient".to_string(),
        )),
    }
}

pub async fn append(pool: &DbPool, new_message: NewMessage) -> AppResult<Message> {
    validate_message_content(&new_message.content)?;
    validate_target(&new_message)?;

    let message = Message {
        id: Uuid::new_v4().to_string(),
        kind: new_message.kind,
        sender_id: new_message.sender_id.clone(),
        recipient_id: new_message.recipient_id,
        community_id: new_message.community_id,
        content: new_message.content,
        created_at: now_timestamp(),
        read_by: vec![new_message.sender_id],
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO messages (id, kind, sender_id, recipient_id, community_id, content, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&message.id)
    .bind(message.kind)
    .bind(&message.sender_id)
    .bind(&message.recipient_id)
    .bind(&message.community_id)
    .bind(&message.content)
    .bind(&message.created_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO message_reads (message_id, user_id, read_at) VALUES (?, ?, ?)")
        .bind(&message.id)
        .bind(&message.sender_id)
        .bind(&message.created_at)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::debug!(
        "Stored {:?} message {} from {}",
        message.kind,
        message.id,
        message.sender_id
    );

    Ok(message)
}

pub async fn find_message(pool: &DbPool, message_id: &str) -> AppResult<Option<Message>> {
    let message = sqlx::query_as::<_, Message>(
        "SELECT id, kind, sender_id, recipient_id, community_id, content, created_at
         FROM messages WHERE id = ?",
    )
    .bind(message_id)
    .fetch_optional(pool.as_ref())
    .await?;

    match message {
        Some(message) => Ok(attach_read_by(pool, vec![message]).await?.pop()),
        None => Ok(None),
    }
}

pub async fn get_message(pool: &DbPool, message_id: &str) -> AppResult<Message> {
    find_message(pool, message_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".to_string()))
}

/// Records that `user_id` has seen the message. Repeated calls are no-ops.
pub async fn mark_read(pool: &DbPool, message_id: &str, user_id: &str) -> AppResult<()> {
    let exists = sqlx::query("SELECT COUNT(*) as count FROM messages WHERE id = ?")
        .bind(message_id)
        .fetch_one(pool.as_ref())
        .await?
        .get::<i64, _>("count");

    if exists == 0 {
        return Err(AppError::NotFound("Message not found".to_string()));
    }

    sqlx::query(
        "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?, ?, ?)",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(now_timestamp())
    .execute(pool.as_ref())
    .await?;

    Ok(())
}

/// Acknowledges a batch of messages already known to exist.
pub async fn mark_read_many(
    pool: &DbPool,
    message_ids: &[String],
    user_id: &str,
) -> AppResult<u64> {
    if message_ids.is_empty() {
        return Ok(0);
    }

    let read_at = now_timestamp();
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) ");
    qb.push_values(message_ids, |mut row, id| {
        row.push_bind(id).push_bind(user_id).push_bind(&read_at);
    });

    let result = qb.build().execute(pool.as_ref()).await?;
    Ok(result.rows_affected())
}

/// Messages of one conversation, oldest first. Group history is only
/// readable by current members.
pub async fn history(pool: &DbPool, query: &HistoryQuery) -> AppResult<Vec<Message>> {
    if query.kind == MessageKind::Group {
        directory::require_member(pool, &query.counterpart, &query.caller_id).await?;
    }

    let before_seq = match &query.before {
        Some(cursor) => sqlx::query("SELECT seq FROM messages WHERE id = ?")
            .bind(cursor)
            .fetch_optional(pool.as_ref())
            .await?
            .map(|row| row.get::<i64, _>("seq"))
            .ok_or_else(|| AppError::NotFound("Cursor message not found".to_string()))?,
        None => i64::MAX,
    };

    let limit = query.limit.max(1);

    let mut messages = match query.kind {
        MessageKind::Direct => {
            sqlx::query_as::<_, Message>(
                "SELECT id, kind, sender_id, recipient_id, community_id, content, created_at
                 FROM messages
                 WHERE kind = 'direct'
                   AND ((sender_id = ? AND recipient_id = ?) OR (sender_id = ? AND recipient_id = ?))
                   AND seq < ?
                 ORDER BY seq DESC LIMIT ?",
            )
            .bind(&query.caller_id)
            .bind(&query.counterpart)
            .bind(&query.counterpart)
            .bind(&query.caller_id)
            .bind(before_seq)
            .bind(limit)
            .fetch_all(pool.as_ref())
            .await?
        }
        MessageKind::Group => {
            sqlx::query_as::<_, Message>(
                "SELECT id, kind, sender_id, recipient_id, community_id, content, created_at
                 FROM messages
                 WHERE kind = 'group' AND community_id = ? AND seq < ?
                 ORDER BY seq DESC LIMIT ?",
            )
            .bind(&query.counterpart)
            .bind(before_seq)
            .bind(limit)
            .fetch_all(pool.as_ref())
            .await?
        }
    };

    messages.reverse();
    attach_read_by(pool, messages).await
}

pub async fn last_for_counterpart(
    pool: &DbPool,
    caller_id: &str,
    counterpart_id: &str,
) -> AppResult<Option<Message>> {
    let message = sqlx::query_as::<_, Message>(
        "SELECT id, kind, sender_id, recipient_id, community_id, content, created_at
         FROM messages
         WHERE kind = 'direct'
           AND ((sender_id = ? AND recipient_id = ?) OR (sender_id = ? AND recipient_id = ?))
         ORDER BY seq DESC LIMIT 1",
    )
    .bind(caller_id)
    .bind(counterpart_id)
    .bind(counterpart_id)
    .bind(caller_id)
    .fetch_optional(pool.as_ref())
    .await?;

    Ok(message)
}

pub async fn last_for_community(pool: &DbPool, community_id: &str) -> AppResult<Option<Message>> {
    let message = sqlx::query_as::<_, Message>(
        "SELECT id, kind, sender_id, recipient_id, community_id, content, created_at
         FROM messages
         WHERE kind = 'group' AND community_id = ?
         ORDER BY seq DESC LIMIT 1",
    )
    .bind(community_id)
    .fetch_optional(pool.as_ref())
    .await?;

    Ok(message)
}

/// Direct messages from `counterpart_id` to `caller_id` the caller has not
/// acknowledged.
pub async fn unread_from_counterpart(
    pool: &DbPool,
    caller_id: &str,
    counterpart_id: &str,
) -> AppResult<i64> {
    let count = sqlx::query(
        "SELECT COUNT(*) as count FROM messages m
         WHERE m.kind = 'direct' AND m.recipient_id = ? AND m.sender_id = ?
           AND NOT EXISTS (
               SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = ?
           )",
    )
    .bind(caller_id)
    .bind(counterpart_id)
    .bind(caller_id)
    .fetch_one(pool.as_ref())
    .await?
    .get::<i64, _>("count");

    Ok(count)
}

/// Group messages by other members the caller has not acknowledged.
pub async fn unread_in_community(
    pool: &DbPool,
    caller_id: &str,
    community_id: &str,
) -> AppResult<i64> {
    let count = sqlx::query(
        "SELECT COUNT(*) as count FROM messages m
         WHERE m.kind = 'group' AND m.community_id = ? AND m.sender_id != ?
           AND NOT EXISTS (
               SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = ?
           )",
    )
    .bind(community_id)
    .bind(caller_id)
    .bind(caller_id)
    .fetch_one(pool.as_ref())
    .await?
    .get::<i64, _>("count");

    Ok(count)
}

async fn attach_read_by(pool: &DbPool, mut messages: Vec<Message>) -> AppResult<Vec<Message>> {
    if messages.is_empty() {
        return Ok(messages);
    }

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT message_id, user_id FROM message_reads WHERE message_id IN (");
    let mut ids = qb.separated(", ");
    for message in &messages {
        ids.push_bind(message.id.clone());
    }
    ids.push_unseparated(") ORDER BY read_at ASC");

    let mut readers = qb
        .build()
        .fetch_all(pool.as_ref())
        .await?
        .into_iter()
        .map(|row| (row.get::<String, _>("message_id"), row.get::<String, _>("user_id")))
        .into_group_map();

    for message in &mut messages {
        message.read_by = readers.remove(&message.id).unwrap_or_default();
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::directory::fixtures::*;

    const T0: &str = "2026-01-01T00:00:00.000000Z";

    async fn seeded() -> DbPool {
        let pool = memory_pool().await;
        for (id, name) in [("a", "Asha"), ("b", "Bilal"), ("c", "Chen")] {
            add_user(&pool, id, name, T0).await;
        }
        connect(&pool, "a", "b", T0).await;
        add_community(&pool, "g", "Clean Water", "a", T0).await;
        join(&pool, "g", "a", T0).await;
        join(&pool, "g", "b", T0).await;
        pool
    }

    fn direct_history(caller: &str, counterpart: &str) -> HistoryQuery {
        HistoryQuery {
            kind: MessageKind::Direct,
            counterpart: counterpart.to_string(),
            caller_id: caller.to_string(),
            limit: 100,
            before: None,
        }
    }

    #[tokio::test]
    async fn append_sets_sender_as_first_reader() {
        let pool = seeded().await;
        let message = append(&pool, NewMessage::direct("a", "b", "hello")).await.unwrap();

        assert_eq!(message.read_by, vec!["a".to_string()]);
        let stored = get_message(&pool, &message.id).await.unwrap();
        assert_eq!(stored, message);
    }

    #[tokio::test]
    async fn append_rejects_empty_or_ambiguous_messages() {
        let pool = seeded().await;

        let empty = append(&pool, NewMessage::direct("a", "b", "  ")).await;
        assert!(matches!(empty, Err(AppError::Validation(_))));

        let mut both = NewMessage::direct("a", "b", "hi");
        both.community_id = Some("g".to_string());
        assert!(matches!(append(&pool, both).await, Err(AppError::Validation(_))));

        let mut neither = NewMessage::group("a", "g", "hi");
        neither.community_id = None;
        assert!(matches!(append(&pool, neither).await, Err(AppError::Validation(_))));

        let mut wrong_kind = NewMessage::group("a", "g", "hi");
        wrong_kind.kind = MessageKind::Direct;
        assert!(matches!(append(&pool, wrong_kind).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn interleaved_direct_history_is_ascending() {
        let pool = seeded().await;
        let mut sent = Vec::new();
        for i in 0..6 {
            let (from, to) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
            let message = append(&pool, NewMessage::direct(from, to, format!("m{}", i)))
                .await
                .unwrap();
            sent.push(message.id);
        }
        // Noise from another pair must not leak in.
        append(&pool, NewMessage::direct("c", "a", "other")).await.unwrap();

        let from_a = history(&pool, &direct_history("a", "b")).await.unwrap();
        let from_b = history(&pool, &direct_history("b", "a")).await.unwrap();

        let ids: Vec<_> = from_a.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, sent);
        assert_eq!(from_a, from_b);
        assert!(from_a.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert_eq!(from_a[0].sender_id, "a");
        assert_eq!(from_a[1].sender_id, "b");
    }

    #[tokio::test]
    async fn history_pages_backwards_from_cursor() {
        let pool = seeded().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                append(&pool, NewMessage::direct("a", "b", format!("m{}", i)))
                    .await
                    .unwrap()
                    .id,
            );
        }

        let mut query = direct_history("a", "b");
        query.limit = 2;
        let latest = history(&pool, &query).await.unwrap();
        assert_eq!(
            latest.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["m3", "m4"]
        );

        query.before = Some(ids[3].clone());
        let older = history(&pool, &query).await.unwrap();
        assert_eq!(
            older.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["m1", "m2"]
        );

        query.before = Some("missing".to_string());
        assert!(matches!(
            history(&pool, &query).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let pool = seeded().await;
        let message = append(&pool, NewMessage::direct("a", "b", "hi")).await.unwrap();

        mark_read(&pool, &message.id, "b").await.unwrap();
        let once = get_message(&pool, &message.id).await.unwrap().read_by;
        mark_read(&pool, &message.id, "b").await.unwrap();
        let twice = get_message(&pool, &message.id).await.unwrap().read_by;

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
        assert!(matches!(
            mark_read(&pool, "missing", "b").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unread_counts_only_messages_addressed_to_caller() {
        let pool = seeded().await;
        append(&pool, NewMessage::direct("a", "b", "one")).await.unwrap();
        let second = append(&pool, NewMessage::direct("a", "b", "two")).await.unwrap();
        append(&pool, NewMessage::direct("b", "a", "reply")).await.unwrap();

        assert_eq!(unread_from_counterpart(&pool, "b", "a").await.unwrap(), 2);
        // The sender never accrues unread for their own messages.
        assert_eq!(unread_from_counterpart(&pool, "a", "b").await.unwrap(), 1);

        mark_read(&pool, &second.id, "b").await.unwrap();
        assert_eq!(unread_from_counterpart(&pool, "b", "a").await.unwrap(), 1);

        append(&pool, NewMessage::group("a", "g", "group hi")).await.unwrap();
        assert_eq!(unread_in_community(&pool, "b", "g").await.unwrap(), 1);
        assert_eq!(unread_in_community(&pool, "a", "g").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn group_history_requires_membership() {
        let pool = seeded().await;
        let message = append(&pool, NewMessage::group("b", "g", "hello all")).await.unwrap();

        let query = HistoryQuery {
            kind: MessageKind::Group,
            counterpart: "g".to_string(),
            caller_id: "a".to_string(),
            limit: 50,
            before: None,
        };
        let seen = history(&pool, &query).await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, message.id);

        let outsider = HistoryQuery {
            caller_id: "c".to_string(),
            ..query
        };
        assert!(matches!(
            history(&pool, &outsider).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn last_message_lookups() {
        let pool = seeded().await;
        assert!(last_for_counterpart(&pool, "a", "b").await.unwrap().is_none());
        assert!(last_for_community(&pool, "g").await.unwrap().is_none());

        append(&pool, NewMessage::direct("a", "b", "first")).await.unwrap();
        append(&pool, NewMessage::direct("b", "a", "second")).await.unwrap();
        append(&pool, NewMessage::group("a", "g", "group")).await.unwrap();

        let last = last_for_counterpart(&pool, "a", "b").await.unwrap().unwrap();
        assert_eq!(last.content, "second");
        let last_group = last_for_community(&pool, "g").await.unwrap().unwrap();
        assert_eq!(last_group.content, "group");
    }

    #[tokio::test]
    async fn mark_read_many_skips_existing_acknowledgements() {
        let pool = seeded().await;
        let one = append(&pool, NewMessage::direct("a", "b", "one")).await.unwrap();
        let two = append(&pool, NewMessage::direct("a", "b", "two")).await.unwrap();
        mark_read(&pool, &one.id, "b").await.unwrap();

        let inserted = mark_read_many(&pool, &[one.id.clone(), two.id.clone()], "b")
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(unread_from_counterpart(&pool, "b", "a").await.unwrap(), 0);
    }
}
