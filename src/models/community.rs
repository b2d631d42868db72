use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::profile::NamedEntity;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Community {
    pub id: String,
    pub name: String,
    pub description: String,
    pub sdg: Option<String>,
    pub creator_id: String,
    pub created_at: String,
}

impl NamedEntity for Community {
    fn display_name(&self) -> String {
        self.name.clone()
    }
}

/// A community the caller currently belongs to, with the roster size.
#[derive(Debug, Clone, FromRow)]
pub struct Membership {
    #[sqlx(flatten)]
    pub community: Community,
    pub joined_at: String,
    pub member_count: i64,
}

/// An accepted connection, seen from one side.
#[derive(Debug, Clone, FromRow)]
pub struct Connection {
    pub counterpart_id: String,
    pub connected_at: String,
}
