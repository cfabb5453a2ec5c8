use axum::http::StatusCode;
use axum::Json;
use jukebox::JukeboxError;

use crate::state::ErrorResponse;

pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn jukebox_error(err: JukeboxError) -> (StatusCode, Json<ErrorResponse>) {
    json_error(error_status(&err), err.to_string())
}

pub fn error_status(err: &JukeboxError) -> StatusCode {
    match err {
        JukeboxError::UnknownPartition(_) => StatusCode::NOT_FOUND,
        JukeboxError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        JukeboxError::CacheUnavailable | JukeboxError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
        JukeboxError::ProtocolFatal(_) => StatusCode::BAD_GATEWAY,
        JukeboxError::ProtocolRecoverable(_) | JukeboxError::AddFailed(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        JukeboxError::SelectionUnderfilled { .. }
        | JukeboxError::Cache(_)
        | JukeboxError::WorkerSpawnFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
