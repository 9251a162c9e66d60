//! Cache-side state for likes.
//!
//! Like sets live in the cache under the `likes:` namespace and are the source of
//! truth for live like counts; the durable store only holds the reconciled copy.
//!
//! ```text
//! likes:<noteId>   set of actor ids currently liking the note
//! dirty:likes      set of note ids touched since their last reconciliation
//! ```
//!
//! Backends implement [`SetCache`]; see `infra::cache` for Redis and the
//! in-process implementation.

mod keys;

pub use keys::{DIRTY_LIKES_KEY, InvalidLikesKey, LIKES_PREFIX, likes_key, note_from_likes_key};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connection(String),
    #[error("cache command `{command}` failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
}

impl CacheError {
    pub fn command(command: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Command {
            command,
            message: err.to_string(),
        }
    }
}

/// The set operations the like subsystem needs from a cache.
///
/// Individual operations are expected to be atomic per key; callers add no locking.
#[async_trait]
pub trait SetCache: Send + Sync {
    /// Add `member` to the set; `true` when it was not a member before.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, CacheError>;

    /// Remove `member` from the set; `true` when it was a member.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError>;

    /// Number of members; missing keys count as empty sets.
    async fn set_cardinality(&self, key: &str) -> Result<u64, CacheError>;

    /// Remove and return up to `count` arbitrary members.
    async fn set_pop(&self, key: &str, count: usize) -> Result<Vec<String>, CacheError>;

    /// Every key starting with `prefix`, in no particular order.
    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
}
