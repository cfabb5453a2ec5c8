pub mod caches;
pub mod events;
pub mod jukebox;
pub mod queue;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ::jukebox::JukeboxError;

use crate::event_loop::{Command, Reply};
use crate::state::{AppState, ErrorResponse, HealthResponse};
use crate::utils::jukebox_error;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/partitions", get(jukebox::list_partitions))
        .route("/partitions/:partition/jukebox", get(jukebox::list_entries))
        .route("/partitions/:partition/jukebox/mode", post(jukebox::set_mode))
        .route("/partitions/:partition/jukebox/run", post(jukebox::run))
        .route("/partitions/:partition/jukebox/clear", post(jukebox::clear))
        .route(
            "/partitions/:partition/jukebox/remove",
            post(jukebox::remove_entries),
        )
        .route(
            "/partitions/:partition/jukebox/script",
            post(jukebox::script_result),
        )
        .route("/partitions/:partition/queue/random", post(queue::add_random))
        .route("/caches/create", post(caches::create))
        .route("/events", get(events::events))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Runs a command on the event loop and maps its error for the client.
pub(crate) async fn call<T>(
    state: &AppState,
    build: impl FnOnce(Reply<Result<T, JukeboxError>>) -> Command,
) -> Result<T, (StatusCode, Json<ErrorResponse>)> {
    state.events.request(build).await.map_err(jukebox_error)
}
