//! Paso de combinación final de un job.
//!
//! Cuando una ronda deja una única salida y todas las tareas terminaron, el
//! orquestador le pasa esa salida a un `OutputFinalizer` junto con el divisor
//! (ver `AggregationMode::divisor`). La transformación es enchufable.

use std::sync::Arc;

use async_trait::async_trait;
use common::{scale_csv, Job};
use tracing::info;

use crate::storage::ObjectStore;

#[async_trait]
pub trait OutputFinalizer: Send + Sync {
    async fn finalize(
        &self,
        job: &Job,
        output: Vec<String>,
        divisor: f64,
    ) -> Result<Vec<String>, String>;
}

/// Devuelve la salida tal cual.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

#[async_trait]
impl OutputFinalizer for Passthrough {
    async fn finalize(
        &self,
        _job: &Job,
        output: Vec<String>,
        _divisor: f64,
    ) -> Result<Vec<String>, String> {
        Ok(output)
    }
}

/// Lee el CSV final, divide cada valor numérico y lo guarda como
/// `<job_id>-final.csv`.
pub struct CsvScale {
    store: Arc<dyn ObjectStore>,
}

impl CsvScale {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OutputFinalizer for CsvScale {
    async fn finalize(
        &self,
        job: &Job,
        output: Vec<String>,
        divisor: f64,
    ) -> Result<Vec<String>, String> {
        if divisor == 1.0 {
            return Ok(output);
        }

        let [reference] = output.as_slice() else {
            return Err(format!(
                "se esperaba una única salida, llegaron {}",
                output.len()
            ));
        };

        let data = self
            .store
            .load(reference)
            .await
            .map_err(|e| e.to_string())?;
        let scaled = scale_csv(&data, divisor).map_err(|e| e.to_string())?;

        let name = format!("{}-final.csv", job.id);
        let new_ref = self
            .store
            .save(&scaled, &name)
            .await
            .map_err(|e| e.to_string())?;

        info!(
            "job {}: salida {} dividida por {} -> {}",
            job.id, reference, divisor, new_ref
        );
        Ok(vec![new_ref])
    }
}
