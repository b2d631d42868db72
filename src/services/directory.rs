//! Read-only lookups into data owned by the rest of the platform: profiles,
//! accepted connections and community rosters.

use sqlx::Row;

use crate::database::DbPool;
use crate::models::community::{Community, Connection, Membership};
use crate::models::profile::{UserProfile, UserRow};
use crate::utils::error::{AppError, AppResult};

pub async fn find_profile(pool: &DbPool, user_id: &str) -> AppResult<Option<UserProfile>> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, stakeholder_type, full_name, ngo_name, company_name, institution_name, created_at
         FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool.as_ref())
    .await?;

    Ok(row.map(UserProfile::from))
}

pub async fn user_exists(pool: &DbPool, user_id: &str) -> AppResult<bool> {
    let count = sqlx::query("SELECT COUNT(*) as count FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool.as_ref())
        .await?
        .get::<i64, _>("count");

    Ok(count > 0)
}

/// Accepted connections of `user_id`, in either direction.
pub async fn connections_of(pool: &DbPool, user_id: &str) -> AppResult<Vec<Connection>> {
    let connections = sqlx::query_as::<_, Connection>(
        "SELECT CASE WHEN requester_id = ? THEN recipient_id ELSE requester_id END AS counterpart_id,
                created_at AS connected_at
         FROM connections
         WHERE (requester_id = ? OR recipient_id = ?) AND status = 'accepted'",
    )
    .bind(user_id)
    .bind(user_id)
    .bind(user_id)
    .fetch_all(pool.as_ref())
    .await?;

    Ok(connections)
}

pub async fn are_connected(pool: &DbPool, a: &str, b: &str) -> AppResult<bool> {
    let count = sqlx::query(
        "SELECT COUNT(*) as count FROM connections
         WHERE status = 'accepted'
           AND ((requester_id = ? AND recipient_id = ?) OR (requester_id = ? AND recipient_id = ?))",
    )
    .bind(a)
    .bind(b)
    .bind(b)
    .bind(a)
    .fetch_one(pool.as_ref())
    .await?
    .get::<i64, _>("count");

    Ok(count > 0)
}

pub async fn find_community(pool: &DbPool, community_id: &str) -> AppResult<Option<Community>> {
    let community = sqlx::query_as::<_, Community>("SELECT * FROM communities WHERE id = ?")
        .bind(community_id)
        .fetch_optional(pool.as_ref())
        .await?;

    Ok(community)
}

pub async fn is_member(pool: &DbPool, community_id: &str, user_id: &str) -> AppResult<bool> {
    let count = sqlx::query(
        "SELECT COUNT(*) as count FROM community_members WHERE community_id = ? AND user_id = ?",
    )
    .bind(community_id)
    .bind(user_id)
    .fetch_one(pool.as_ref())
    .await?
    .get::<i64, _>("count");

    Ok(count > 0)
}

pub async fn member_ids(pool: &DbPool, community_id: &str) -> AppResult<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT user_id FROM community_members WHERE community_id = ?",
    )
    .bind(community_id)
    .fetch_all(pool.as_ref())
    .await?;

    Ok(ids)
}

/// Fails with `NotFound` for an unknown community and `Forbidden` when the
/// caller is not currently on its roster.
pub async fn require_member(pool: &DbPool, community_id: &str, user_id: &str) -> AppResult<()> {
    if find_community(pool, community_id).await?.is_none() {
        return Err(AppError::NotFound("Community not found".to_string()));
    }

    if !is_member(pool, community_id, user_id).await? {
        return Err(AppError::Forbidden(
            "Not a member of this community".to_string(),
        ));
    }

    Ok(())
}

pub async fn joined_communities(pool: &DbPool, user_id: &str) -> AppResult<Vec<Membership>> {
    let memberships = sqlx::query_as::<_, Membership>(
        "SELECT c.*, cm.joined_at,
                (SELECT COUNT(*) FROM community_members all_m WHERE all_m.community_id = c.id) AS member_count
         FROM community_members cm
         JOIN communities c ON c.id = cm.community_id
         WHERE cm.user_id = ?",
    )
    .bind(user_id)
    .fetch_all(pool.as_ref())
    .await?;

    Ok(memberships)
}
