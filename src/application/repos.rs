//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::NoteRecord;
use crate::domain::types::{NoteId, UserId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Whether repeating the same write could succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::Persistence(_) | RepoError::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewFollow {
    pub follower_id: UserId,
    pub followed_id: UserId,
}

/// Outcome of persisting a follow edge; the store deduplicates edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowInsert {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone)]
pub struct CreateNoteParams {
    pub author_id: UserId,
    pub title: String,
    pub content: String,
    pub img_url: Option<String>,
}

#[async_trait]
pub trait FollowsWriteRepo: Send + Sync {
    async fn create_follow(&self, follow: NewFollow) -> Result<FollowInsert, RepoError>;
}

#[async_trait]
pub trait NotesRepo: Send + Sync {
    async fn find_note(&self, id: NoteId) -> Result<Option<NoteRecord>, RepoError>;
}

#[async_trait]
pub trait NotesWriteRepo: Send + Sync {
    async fn create_note(&self, params: CreateNoteParams) -> Result<NoteRecord, RepoError>;

    /// Overwrite the denormalized like count; `RepoError::NotFound` when the note is missing.
    async fn update_like_count(&self, id: NoteId, count: u64) -> Result<(), RepoError>;
}

#[async_trait]
pub trait HealthRepo: Send + Sync {
    /// Round-trip to the store; `Err` when it cannot answer.
    async fn health_check(&self) -> Result<(), RepoError>;
}
