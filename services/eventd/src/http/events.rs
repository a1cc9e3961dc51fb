use axum::{extract::State, response::Response, Json};
use ev_core::Payload;
use ev_store::Error;
use serde::Deserialize;
use ulid::Ulid;

use crate::http::response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StoreRequest {
    /// Absent or zero-time ids are replaced by a generated one.
    #[serde(default)]
    pub id: Option<Ulid>,
    pub topic: String,
    #[serde(default)]
    pub payload: Option<Payload>,
}

/// `PUT /events`
pub async fn store(State(state): State<AppState>, Json(request): Json<StoreRequest>) -> Response {
    let Some(payload) = request.payload else {
        return response::failure(&Error::EmptyPayload);
    };
    let id = request.id.filter(|id| id.timestamp_ms() > 0);

    match state.svc.store(&request.topic, payload, id).await {
        Ok(()) => response::success("event stored"),
        Err(err) => response::failure(&err),
    }
}
