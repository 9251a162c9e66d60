//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::types::{NoteId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteRecord {
    pub id: NoteId,
    pub author_id: UserId,
    pub title: String,
    pub content: String,
    pub img_url: Option<String>,
    /// Denormalized like count, written only by the like reconciler.
    pub like_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A pending follow edge, created by the request layer and persisted asynchronously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowTask {
    pub follower_id: UserId,
    pub followed_id: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub accepted_at: OffsetDateTime,
}

impl FollowTask {
    pub fn new(follower_id: UserId, followed_id: UserId) -> Self {
        Self {
            follower_id,
            followed_id,
            accepted_at: OffsetDateTime::now_utc(),
        }
    }
}
