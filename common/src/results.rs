use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Mensaje que se publica en la cola de salida cuando un job termina.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutput {
    pub job_id: JobId,
    pub output: Vec<String>,
}
