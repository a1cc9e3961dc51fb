use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use ev_store::Error;
use serde::{Deserialize, Serialize};

/// The envelope every endpoint answers with.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResult<T = ()> {
    pub status: Status,
    pub msg: String,
    pub data: Option<T>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

pub fn success(msg: impl Into<String>) -> Response {
    success_with::<()>(msg, None)
}

pub fn success_with<T: Serialize>(msg: impl Into<String>, data: Option<T>) -> Response {
    Json(ApiResult {
        status: Status::Success,
        msg: msg.into(),
        data,
        time: Utc::now(),
    })
    .into_response()
}

/// Map a service error onto a failure envelope. A missing iterator is 404;
/// every other store/fetch error (empty payload, timeout, backend failures)
/// is the caller's 422.
pub fn failure(err: &Error) -> Response {
    let status = match err {
        Error::IteratorNotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (
        status,
        Json(ApiResult::<()> {
            status: Status::Failure,
            msg: err.to_string(),
            data: None,
            time: Utc::now(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(response: Response) -> ApiResult<serde_json::Value> {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        serde_json::from_slice(&body).expect("envelope json")
    }

    #[tokio::test]
    async fn success_envelope_carries_msg_and_null_data() {
        let response = success("event stored");
        assert_eq!(response.status(), StatusCode::OK);

        let envelope = body_of(response).await;
        assert_eq!(envelope.status, Status::Success);
        assert_eq!(envelope.msg, "event stored");
        assert!(envelope.data.is_none());
    }

    #[tokio::test]
    async fn missing_iterator_maps_to_not_found() {
        let response = failure(&Error::IteratorNotFound);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let envelope = body_of(response).await;
        assert_eq!(envelope.status, Status::Failure);
        assert_eq!(envelope.msg, "iterator not found");
    }

    #[tokio::test]
    async fn other_errors_map_to_unprocessable() {
        for err in [Error::EmptyPayload, Error::Timeout, Error::Empty] {
            let response = failure(&err);
            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        }
    }
}
