//! Cache key conventions shared by the like toggle and the reconciler.

use thiserror::Error;

use crate::domain::types::NoteId;

/// Namespace of per-note like sets.
pub const LIKES_PREFIX: &str = "likes:";

/// Set of note ids whose like set changed since they were last reconciled.
///
/// Kept outside [`LIKES_PREFIX`] so prefix enumeration never returns it.
pub const DIRTY_LIKES_KEY: &str = "dirty:likes";

#[derive(Debug, Error)]
#[error("cache key `{key}` does not name a note like set: {reason}")]
pub struct InvalidLikesKey {
    pub key: String,
    pub reason: String,
}

pub fn likes_key(note: NoteId) -> String {
    format!("{LIKES_PREFIX}{note}")
}

/// Recover the note id from a `likes:<noteId>` key.
pub fn note_from_likes_key(key: &str) -> Result<NoteId, InvalidLikesKey> {
    let suffix = key.strip_prefix(LIKES_PREFIX).ok_or_else(|| InvalidLikesKey {
        key: key.to_string(),
        reason: format!("missing `{LIKES_PREFIX}` prefix"),
    })?;

    suffix.parse::<NoteId>().map_err(|err| InvalidLikesKey {
        key: key.to_string(),
        reason: err.to_string(),
    })
}
