use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::domain::types::UserId;

use super::error::ApiError;
use super::state::ApiState;

/// Header carrying the acting user, set by the upstream authentication gateway.
pub const ACTOR_HEADER: &str = "x-user-id";

/// The authenticated user performing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub UserId);

pub async fn require_actor(mut request: Request<Body>, next: Next) -> Response {
    let raw = request
        .headers()
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok());

    let actor = match raw.map(str::parse::<UserId>) {
        Some(Ok(actor)) => actor,
        Some(Err(err)) => {
            debug!(
                target = "cuplore::http::auth",
                error = %err,
                "rejecting malformed actor header"
            );
            return ApiError::unauthorized().into_response();
        }
        None => return ApiError::unauthorized().into_response(),
    };

    request.extensions_mut().insert(Actor(actor));
    next.run(request).await
}

/// Admin-only routes; layered inside `require_actor`, which supplies the actor.
pub async fn require_admin(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(&Actor(actor)) = request.extensions().get::<Actor>() else {
        return ApiError::unauthorized().into_response();
    };

    if !state.admins.contains(&actor) {
        debug!(
            target = "cuplore::http::auth",
            actor_id = %actor,
            "rejecting non-admin actor"
        );
        return ApiError::forbidden().into_response();
    }

    next.run(request).await
}
