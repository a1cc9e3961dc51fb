use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::http::response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NewIteratorRequest {
    pub topic: String,
    /// RFC3339; absent means "replay from the beginning".
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

/// `POST /events/iterators`
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<NewIteratorRequest>,
) -> Response {
    let since = request.since.unwrap_or(DateTime::UNIX_EPOCH);
    match state.svc.new_iterator(&request.topic, since).await {
        Ok(id) => response::success_with("iterator created", Some(id)),
        Err(err) => response::failure(&err),
    }
}

#[derive(Debug, Deserialize)]
pub struct FetchParams {
    #[serde(default = "default_batch")]
    pub batch: usize,
}

fn default_batch() -> usize {
    10
}

/// `GET /events/iterators/:iterator_id?batch=N`
pub async fn fetch(
    State(state): State<AppState>,
    Path(iterator_id): Path<String>,
    Query(params): Query<FetchParams>,
) -> Response {
    match state
        .svc
        .fetch_from_iterator(params.batch, &iterator_id)
        .await
    {
        Ok(events) => response::success_with("ok", Some(events)),
        Err(err) => response::failure(&err),
    }
}

/// `DELETE /events/iterators/:iterator_id`
pub async fn close(State(state): State<AppState>, Path(iterator_id): Path<String>) -> Response {
    match state.svc.close_iterator(&iterator_id).await {
        Ok(()) => response::success("iterator closed"),
        Err(err) => response::failure(&err),
    }
}
