pub mod config;
pub mod http;
pub mod state;

pub use state::AppState;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/events", put(http::events::store))
        .route("/events/iterators", post(http::iterators::create))
        .route(
            "/events/iterators/:iterator_id",
            get(http::iterators::fetch).delete(http::iterators::close),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
