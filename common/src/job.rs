use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = String;

/// Cuerpo de `POST /api/v1/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Referencias opacas (ej: keys de archivos en el object storage).
    #[serde(default)]
    pub input: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    /// COMPLETED y FAILED son terminales: un job no sale de ahí.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub input: Vec<String>,
    pub status: JobStatus,

    /// -------- Tiempos del job --------
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,

    /// Sólo presente cuando el job está COMPLETED.
    pub output: Option<Vec<String>>,
}

impl Job {
    pub fn new(input: Vec<String>) -> Self {
        Self {
            id: crate::new_id(),
            input,
            status: JobStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            output: None,
        }
    }
}
