use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

/// Tarea tal como viaja a los workers por la cola (JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,

    /// Partición del input (o salidas parciales en una ronda de reducción)
    pub input: Vec<String>,
    pub status: TaskStatus,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub output: Option<Vec<String>>,
}

impl Task {
    pub fn new(job_id: JobId, input: Vec<String>) -> Self {
        Self {
            id: crate::new_id(),
            job_id,
            input,
            status: TaskStatus::Pending,
            start_time: None,
            end_time: None,
            duration_ms: None,
            output: None,
        }
    }
}

/// Cuerpo de `POST /api/v1/jobs/:job_id/tasks/:task_id/complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleteRequest {
    #[serde(default)]
    pub output: Vec<String>,
}

/// `ok = false` cuando la tarea ya estaba completada (reporte duplicado).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleteResponse {
    pub ok: bool,
}

/// Cuerpo de `POST /api/v1/jobs/:job_id/tasks/:task_id/fail`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFailRequest {
    #[serde(default)]
    pub reason: String,
}
