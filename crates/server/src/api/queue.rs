use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use jukebox::{JobOutcome, SongSource};

use crate::api::call;
use crate::event_loop::Command;
use crate::state::{AppState, CountResponse, JsonResult, RandomAddRequest};
use crate::utils::json_error;

/// Adds random songs or albums right away, ignoring the jukebox constraints.
pub async fn add_random(
    State(state): State<AppState>,
    Path(partition): Path<String>,
    Json(payload): Json<RandomAddRequest>,
) -> JsonResult<CountResponse> {
    let outcome = call(&state, |reply| Command::AddRandom {
        partition,
        quantity: payload.quantity,
        album: payload.album,
        source: SongSource::parse(&payload.source),
        play: payload.play,
        reply,
    })
    .await?;
    match outcome {
        JobOutcome::Added { count } => Ok(Json(CountResponse { count })),
        other => Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unexpected job outcome: {:?}", other),
        )),
    }
}
