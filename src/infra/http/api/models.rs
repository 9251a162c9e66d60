use serde::{Deserialize, Serialize};

use crate::application::jobs::DeadLetter;
use crate::domain::types::{LikeOutcome, NoteId};

#[derive(Debug, Deserialize, Serialize)]
pub struct NoteCreateRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub img_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NoteCreatedResponse {
    pub note_id: NoteId,
}

#[derive(Debug, Serialize)]
pub struct LikeCountResponse {
    pub note_id: NoteId,
    pub likes: u64,
}

#[derive(Debug, Serialize)]
pub struct LikeToggleResponse {
    pub note_id: NoteId,
    pub state: LikeOutcome,
}

#[derive(Debug, Serialize)]
pub struct FollowAcceptedResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterListResponse {
    pub total: usize,
    pub items: Vec<DeadLetter>,
}
