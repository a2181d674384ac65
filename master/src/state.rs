// master/src/state.rs

use std::sync::Arc;

use crate::orchestrator::Master;
use crate::pool::WorkerPool;

/// Estado compartido por los handlers HTTP.
#[derive(Clone)]
pub struct AppState {
    pub master: Arc<Master>,
    pub pool: Arc<WorkerPool>,
}

impl AppState {
    pub fn new(master: Arc<Master>, pool: Arc<WorkerPool>) -> Self {
        Self { master, pool }
    }
}
