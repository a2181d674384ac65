//! Errores del master.
//!
//! La taxonomía sigue lo que hace el orquestador con cada caso:
//! - `NotFound`: id desconocido, resultado negativo (404 en HTTP).
//! - `Conflict`: tarea o job ya completado, esperable con entrega
//!   at-least-once y ejecución especulativa (se loguea como warn).
//! - `InvariantViolation`: un worker reporta un job inexistente; es un bug.
//! - `Store` / `Queue` / `Finalize`: fallas de I/O que se propagan. Los
//!   mensajes que no se pudieron publicar los reintenta el monitor.

use thiserror::Error;

/// Fallas de la capa de almacenamiento (nunca "no encontrado").
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lock del store envenenado")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no se pudo conectar al broker: {0}")]
    Connection(String),

    #[error("no se pudo declarar la cola '{queue}': {reason}")]
    Declare { queue: String, reason: String },

    #[error("no se pudo publicar en '{queue}': {reason}")]
    Publish { queue: String, reason: String },

    #[error("error serializando mensaje: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl QueueError {
    pub fn publish(queue: &str, reason: impl ToString) -> Self {
        QueueError::Publish {
            queue: queue.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("backend de contenedores no disponible: {0}")]
    Unavailable(String),

    #[error("no se pudo crear el worker {worker_id}: {reason}")]
    Create { worker_id: String, reason: String },

    #[error("no se pudo borrar el worker {worker_id}: {reason}")]
    Delete { worker_id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("referencia inválida: {0}")]
    InvalidReference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("{kind} {id} no encontrado")]
    NotFound { kind: &'static str, id: String },

    #[error("conflicto: {0}")]
    Conflict(String),

    #[error("invariante violada: {0}")]
    InvariantViolation(String),

    #[error("input inválido: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("falló la combinación final: {0}")]
    Finalize(String),
}

impl MasterError {
    pub fn job_not_found(id: &str) -> Self {
        MasterError::NotFound {
            kind: "job",
            id: id.to_string(),
        }
    }

    pub fn task_not_found(id: &str) -> Self {
        MasterError::NotFound {
            kind: "tarea",
            id: id.to_string(),
        }
    }
}

pub type Result<T, E = MasterError> = std::result::Result<T, E>;
