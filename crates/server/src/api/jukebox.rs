use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use jukebox::{JukeboxList, PartitionSummary};

use crate::api::call;
use crate::config::{parse_mode, parse_tag};
use crate::event_loop::Command;
use crate::state::{
    AppState, CountResponse, HealthResponse, JsonResult, ListQuery, ModeRequest, RemoveRequest,
    ScriptResultRequest,
};
use crate::utils::json_error;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

pub async fn list_partitions(State(state): State<AppState>) -> JsonResult<Vec<PartitionSummary>> {
    let summaries = call(&state, |reply| Command::Partitions { reply }).await?;
    Ok(Json(summaries))
}

pub async fn list_entries(
    State(state): State<AppState>,
    Path(partition): Path<String>,
    Query(query): Query<ListQuery>,
) -> JsonResult<JukeboxList> {
    let offset = query.offset.unwrap_or(0);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let list = call(&state, |reply| Command::List {
        partition,
        offset,
        limit,
        reply,
    })
    .await?;
    Ok(Json(list))
}

pub async fn set_mode(
    State(state): State<AppState>,
    Path(partition): Path<String>,
    Json(payload): Json<ModeRequest>,
) -> JsonResult<HealthResponse> {
    let mode = parse_mode(&payload.mode, &payload.source, &payload.script)
        .map_err(|message| json_error(StatusCode::BAD_REQUEST, message))?;
    let uniq_tag = parse_tag(&payload.uniq_tag)
        .map_err(|message| json_error(StatusCode::BAD_REQUEST, message))?;
    let constraints = payload.constraints(uniq_tag);
    call(&state, |reply| Command::SetMode {
        partition,
        mode,
        queue_length: payload.queue_length,
        constraints,
        reply,
    })
    .await?;
    Ok(Json(HealthResponse { status: "ok" }))
}

pub async fn run(
    State(state): State<AppState>,
    Path(partition): Path<String>,
) -> JsonResult<HealthResponse> {
    call(&state, |reply| Command::Run { partition, reply }).await?;
    Ok(Json(HealthResponse { status: "ok" }))
}

pub async fn clear(
    State(state): State<AppState>,
    Path(partition): Path<String>,
) -> JsonResult<HealthResponse> {
    call(&state, |reply| Command::Clear { partition, reply }).await?;
    Ok(Json(HealthResponse { status: "ok" }))
}

pub async fn remove_entries(
    State(state): State<AppState>,
    Path(partition): Path<String>,
    Json(payload): Json<RemoveRequest>,
) -> JsonResult<CountResponse> {
    let count = call(&state, |reply| Command::Remove {
        partition,
        positions: payload.positions,
        reply,
    })
    .await?;
    Ok(Json(CountResponse { count }))
}

pub async fn script_result(
    State(state): State<AppState>,
    Path(partition): Path<String>,
    Json(payload): Json<ScriptResultRequest>,
) -> JsonResult<CountResponse> {
    let count = call(&state, |reply| Command::ScriptResult {
        partition,
        uris: payload.uris,
        reply,
    })
    .await?;
    Ok(Json(CountResponse { count }))
}
