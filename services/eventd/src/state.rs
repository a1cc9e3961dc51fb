use std::sync::Arc;

use ev_store::service::Service;

#[derive(Clone)]
pub struct AppState {
    pub svc: Arc<Service>,
}

impl AppState {
    pub fn new(svc: Arc<Service>) -> Self {
        Self { svc }
    }
}
