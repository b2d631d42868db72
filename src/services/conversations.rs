//! Derives the caller's conversation list from their current connections
//! and community memberships. Past messages with someone the caller is no
//! longer connected to stay in the store but drop out of the list.

use std::cmp::Ordering;

use futures_util::future::try_join_all;

use crate::database::DbPool;
use crate::models::community::{Connection, Membership};
use crate::models::conversation::{
    ConversationSummary, ConversationTab, EMPTY_DIRECT_PREVIEW, EMPTY_GROUP_PREVIEW,
};
use crate::models::message::MessageKind;
use crate::models::profile::NamedEntity;
use crate::services::{directory, message_store};
use crate::utils::error::AppResult;

pub async fn list_direct(pool: &DbPool, caller_id: &str) -> AppResult<Vec<ConversationSummary>> {
    let connections = directory::connections_of(pool, caller_id).await?;

    let summaries = try_join_all(
        connections
            .into_iter()
            .map(|connection| direct_summary(pool, caller_id, connection)),
    )
    .await?;

    Ok(sort_summaries(summaries.into_iter().flatten().collect()))
}

pub async fn list_communities(
    pool: &DbPool,
    caller_id: &str,
) -> AppResult<Vec<ConversationSummary>> {
    let memberships = directory::joined_communities(pool, caller_id).await?;

    let summaries = try_join_all(
        memberships
            .into_iter()
            .map(|membership| group_summary(pool, caller_id, membership)),
    )
    .await?;

    Ok(sort_summaries(summaries))
}

/// Direct and group conversations under one ordering.
pub async fn list_conversations(
    pool: &DbPool,
    caller_id: &str,
) -> AppResult<Vec<ConversationSummary>> {
    let (direct, groups) = tokio::try_join!(
        list_direct(pool, caller_id),
        list_communities(pool, caller_id)
    )?;

    Ok(sort_summaries(direct.into_iter().chain(groups).collect()))
}

async fn direct_summary(
    pool: &DbPool,
    caller_id: &str,
    connection: Connection,
) -> AppResult<Option<ConversationSummary>> {
    let counterpart = &connection.counterpart_id;

    let (profile, last, unread) = tokio::try_join!(
        directory::find_profile(pool, counterpart),
        message_store::last_for_counterpart(pool, caller_id, counterpart),
        message_store::unread_from_counterpart(pool, caller_id, counterpart),
    )?;

    let Some(profile) = profile else {
        tracing::warn!("Connection {} -> {} has no profile", caller_id, counterpart);
        return Ok(None);
    };

    Ok(Some(ConversationSummary {
        id: profile.id.clone(),
        kind: MessageKind::Direct,
        display_name: profile.display_name(),
        initial: profile.initial(),
        last_message: last
            .as_ref()
            .map(|m| m.content.clone())
            .unwrap_or_else(|| EMPTY_DIRECT_PREVIEW.to_string()),
        last_message_at: last.map(|m| m.created_at),
        unread_count: unread,
        member_count: None,
        online: false,
        relationship_since: connection.connected_at,
    }))
}

async fn group_summary(
    pool: &DbPool,
    caller_id: &str,
    membership: Membership,
) -> AppResult<ConversationSummary> {
    let community = &membership.community;

    let (last, unread) = tokio::try_join!(
        message_store::last_for_community(pool, &community.id),
        message_store::unread_in_community(pool, caller_id, &community.id),
    )?;

    Ok(ConversationSummary {
        id: community.id.clone(),
        kind: MessageKind::Group,
        display_name: community.display_name(),
        initial: community.initial(),
        last_message: last
            .as_ref()
            .map(|m| m.content.clone())
            .unwrap_or_else(|| EMPTY_GROUP_PREVIEW.to_string()),
        last_message_at: last.map(|m| m.created_at),
        unread_count: unread,
        member_count: Some(membership.member_count),
        online: false,
        relationship_since: membership.joined_at,
    })
}

/// Most recent activity first. Conversations without messages go last,
/// newest relationship first.
pub fn compare_summaries(a: &ConversationSummary, b: &ConversationSummary) -> Ordering {
    match (&a.last_message_at, &b.last_message_at) {
        (Some(at_a), Some(at_b)) => at_b.cmp(at_a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.relationship_since.cmp(&a.relationship_since),
    }
    .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_summaries(mut summaries: Vec<ConversationSummary>) -> Vec<ConversationSummary> {
    summaries.sort_by(compare_summaries);
    summaries
}

/// Case-insensitive name search within the active tab. Works on an already
/// derived list and never touches the store.
pub fn filter_conversations(
    conversations: &[ConversationSummary],
    tab: ConversationTab,
    query: &str,
) -> Vec<ConversationSummary> {
    let needle = query.trim().to_lowercase();

    conversations
        .iter()
        .filter(|c| c.kind == tab.kind())
        .filter(|c| needle.is_empty() || c.display_name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}
