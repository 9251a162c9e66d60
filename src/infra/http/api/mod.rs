pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use middleware::{ACTOR_HEADER, Actor};
pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub fn build_api_router(state: ApiState) -> Router {
    let admin = Router::new()
        .route("/admin/dead-letters", get(handlers::list_dead_letters))
        .route(
            "/admin/dead-letters/replay",
            post(handlers::replay_dead_letters),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_admin,
        ));

    Router::new()
        .route("/notes", post(handlers::create_note))
        .route("/notes/{id}", get(handlers::get_note))
        .route("/notes/{id}/likes", get(handlers::like_count))
        .route("/notes/{id}/like", post(handlers::toggle_like))
        .route("/follow/{id}", post(handlers::follow_user))
        .merge(admin)
        .route_layer(axum_middleware::from_fn(middleware::require_actor))
        .with_state(state)
}
