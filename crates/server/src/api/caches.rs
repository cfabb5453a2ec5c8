use axum::extract::{Query, State};
use axum::Json;

use crate::api::call;
use crate::event_loop::Command;
use crate::state::{AppState, CacheRequest, JsonResult, RequestResponse};

/// Starts an album cache rebuild. Completion is announced on `/events`.
pub async fn create(
    State(state): State<AppState>,
    Query(query): Query<CacheRequest>,
) -> JsonResult<RequestResponse> {
    let request_id = call(&state, |reply| Command::RebuildCache {
        force: query.force,
        reply,
    })
    .await?;
    Ok(Json(RequestResponse { request_id }))
}
