pub mod config;
pub mod error;
pub mod finalize;
pub mod handlers;
pub mod monitor;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod state;
pub mod storage;
pub mod store;

pub use error::{MasterError, Result};
pub use orchestrator::{Completion, JobMetrics, Master, OrchestratorConfig};
pub use state::AppState;
