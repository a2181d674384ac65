use serde::{Deserialize, Serialize};

pub type WorkerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

/// Registro de contabilidad de un worker. No se usa para planificar:
/// los workers toman tareas de la cola por su cuenta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub status: WorkerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInitRequest {
    #[serde(default)]
    pub num_workers: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerFailure {
    pub worker_id: WorkerId,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInitResponse {
    /// Sólo los workers que realmente se crearon
    pub workers: Vec<Worker>,
    pub failures: Vec<WorkerFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusRequest {
    pub status: WorkerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDeactivateResponse {
    pub removed: Vec<WorkerId>,
    /// Workers que no se pudieron borrar (siguen registrados)
    pub failures: Vec<WorkerFailure>,
}
