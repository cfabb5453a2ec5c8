use axum::http::StatusCode;
use axum::Json;
use jukebox::{Constraints, Notifier, TagFilter};
use serde::{Deserialize, Serialize};

use crate::event_loop::EventLoopHandle;

#[derive(Clone)]
pub struct AppState {
    pub events: EventLoopHandle,
    pub notifier: Notifier,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ModeRequest {
    pub mode: String,
    pub queue_length: Option<u32>,
    pub source: String,
    pub script: String,
    pub uniq_tag: String,
    pub last_played_hours: u32,
    pub skip_disliked: bool,
    pub min_duration_secs: u32,
    pub max_duration_secs: u32,
    pub include: Vec<TagFilter>,
    pub exclude: Vec<TagFilter>,
}

impl ModeRequest {
    pub fn constraints(&self, uniq_tag: Option<common::Tag>) -> Constraints {
        let mut constraints = Constraints::from_tag_filters(&self.include, &self.exclude);
        constraints.uniq_tag = uniq_tag;
        constraints.last_played_hours = self.last_played_hours;
        constraints.skip_disliked = self.skip_disliked;
        constraints.min_duration_secs = self.min_duration_secs;
        constraints.max_duration_secs = self.max_duration_secs;
        constraints
    }
}

#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    pub positions: Vec<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptResultRequest {
    pub uris: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RandomAddRequest {
    pub quantity: usize,
    #[serde(default)]
    pub album: bool,
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_play")]
    pub play: bool,
}

fn default_play() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CacheRequest {
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct RequestResponse {
    pub request_id: u64,
}

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;
