//! Like toggling against the set cache.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheError, DIRTY_LIKES_KEY, SetCache, likes_key};
use crate::domain::types::{LikeOutcome, NoteId, UserId};

const METRIC_LIKE_TOGGLE_TOTAL: &str = "cuplore_like_toggle_total";

#[derive(Debug, Error)]
pub enum LikeError {
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Clone)]
pub struct LikeService {
    cache: Arc<dyn SetCache>,
    dirty_tracking: bool,
}

impl LikeService {
    pub fn new(cache: Arc<dyn SetCache>) -> Self {
        Self {
            cache,
            dirty_tracking: true,
        }
    }

    /// Record touched notes in the dirty set so the reconciler revisits them.
    pub fn with_dirty_tracking(mut self, enabled: bool) -> Self {
        self.dirty_tracking = enabled;
        self
    }

    /// Flip the actor's like on the note. Only the cache is touched; the
    /// stored counter catches up on the next reconciliation.
    pub async fn toggle(&self, note: NoteId, actor: UserId) -> Result<LikeOutcome, LikeError> {
        let key = likes_key(note);
        let member = actor.to_string();

        let outcome = if self.cache.set_add(&key, &member).await? {
            LikeOutcome::Liked
        } else {
            self.cache.set_remove(&key, &member).await?;
            LikeOutcome::Unliked
        };

        counter!(METRIC_LIKE_TOGGLE_TOTAL, "state" => outcome.as_str()).increment(1);
        debug!(
            target = "cuplore::application::likes",
            note_id = %note,
            actor_id = %actor,
            state = outcome.as_str(),
            "Like toggled"
        );

        if self.dirty_tracking {
            self.mark_dirty(note).await;
        }

        Ok(outcome)
    }

    /// Live like count, read from the cache.
    pub async fn count(&self, note: NoteId) -> Result<u64, LikeError> {
        Ok(self.cache.set_cardinality(&likes_key(note)).await?)
    }

    async fn mark_dirty(&self, note: NoteId) {
        if let Err(err) = self.cache.set_add(DIRTY_LIKES_KEY, &note.to_string()).await {
            warn!(
                target = "cuplore::application::likes",
                note_id = %note,
                error = %err,
                "Failed to mark note dirty; stored count may stay stale until the note is toggled again"
            );
        }
    }
}
