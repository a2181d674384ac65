pub mod aggregate;
pub mod job;
pub mod partition;
pub mod results;
pub mod task;
pub mod worker;

pub use aggregate::{scale_csv, AggregationMode};
pub use job::{Job, JobId, JobRequest, JobStatus};
pub use partition::partition;
pub use results::JobOutput;
pub use task::{
    Task, TaskCompleteRequest, TaskCompleteResponse, TaskFailRequest, TaskId, TaskStatus,
};
pub use worker::{
    Worker, WorkerDeactivateResponse, WorkerFailure, WorkerId, WorkerInitRequest,
    WorkerInitResponse, WorkerStatus, WorkerStatusRequest,
};

use chrono::{DateTime, Utc};

/// Genera un identificador nuevo (UUID v4) para jobs, tareas y workers.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Duración en milisegundos entre dos instantes (nunca negativa).
pub fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().max(0)
}
