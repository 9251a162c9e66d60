use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::application::notes::CreateNoteCommand;
use crate::domain::types::{NoteId, UserId};

use super::error::ApiError;
use super::middleware::Actor;
use super::models::*;
use super::state::ApiState;

/// -------- Notes --------
pub async fn create_note(
    State(state): State<ApiState>,
    Extension(Actor(actor)): Extension<Actor>,
    Json(payload): Json<NoteCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = CreateNoteCommand {
        title: payload.title,
        content: payload.content,
        img_url: payload.img_url,
    };
    let note = state.notes.create(actor, command).await?;

    Ok((
        StatusCode::CREATED,
        Json(NoteCreatedResponse { note_id: note.id }),
    ))
}

pub async fn get_note(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let note = state.notes.find(parse_id::<NoteId>(&id)?).await?;
    Ok(Json(note))
}

/// -------- Likes --------
pub async fn toggle_like(
    State(state): State<ApiState>,
    Extension(Actor(actor)): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let note_id = parse_id::<NoteId>(&id)?;
    let outcome = state.likes.toggle(note_id, actor).await?;

    Ok(Json(LikeToggleResponse {
        note_id,
        state: outcome,
    }))
}

pub async fn like_count(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let note_id = parse_id::<NoteId>(&id)?;
    let likes = state.likes.count(note_id).await?;
    Ok(Json(LikeCountResponse { note_id, likes }))
}

/// -------- Follows --------
pub async fn follow_user(
    State(state): State<ApiState>,
    Extension(Actor(actor)): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.follows.follow(actor, parse_id::<UserId>(&id)?)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(FollowAcceptedResponse { status: "accepted" }),
    ))
}

/// -------- Dead letters --------
pub async fn list_dead_letters(State(state): State<ApiState>) -> impl IntoResponse {
    let items = state.follows.dead_letters();
    Json(DeadLetterListResponse {
        total: items.len(),
        items,
    })
}

pub async fn replay_dead_letters(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.follows.replay_dead_letters())
}

// Path ids are parsed by hand so malformed ones get the JSON error envelope.
fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = crate::domain::error::DomainError>,
{
    raw.parse::<T>().map_err(ApiError::from)
}
