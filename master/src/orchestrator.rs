//! Orquestador (master): parte jobs en tareas, las publica y, a medida que
//! llegan completados, decide si toca otra ronda de reducción o cerrar el job.
//!
//! Muchos workers reportan completados en paralelo. Todo lo que mira o toca
//! las salidas pendientes de un job pasa por un mutex de ese job (nunca uno
//! global), incluida la decisión de publicar.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use common::{
    partition, AggregationMode, Job, JobId, JobOutput, JobStatus, Task, TaskId, TaskStatus,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::error::{MasterError, Result};
use crate::finalize::OutputFinalizer;
use crate::queue::{publish_json, QueueGateway};
use crate::store::{JobStore, JobUpdate, TaskUpdate};

pub const DEFAULT_PARTITION_SIZE: usize = 5;
pub const DEFAULT_REDUCTION_THRESHOLD: usize = 2;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Inputs por tarea en la primera ronda
    pub partition_size: usize,
    /// Salidas pendientes que disparan una tarea de reducción (mínimo 2)
    pub reduction_threshold: usize,
    pub aggregation: AggregationMode,
    pub worker_queue: String,
    pub output_queue: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            partition_size: DEFAULT_PARTITION_SIZE,
            reduction_threshold: DEFAULT_REDUCTION_THRESHOLD,
            aggregation: AggregationMode::Sum,
            worker_queue: "worker-queue".to_string(),
            output_queue: "output-queue".to_string(),
        }
    }
}

/// Métricas de tareas completadas de un job. Sólo las usa el monitor de
/// rezagados, no la lógica de completado.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobMetrics {
    pub completed: u64,
    pub total_duration_ms: i64,
}

impl JobMetrics {
    fn record(&mut self, duration_ms: Option<i64>) {
        self.completed += 1;
        self.total_duration_ms += duration_ms.unwrap_or(0);
    }

    pub fn average_ms(&self) -> Option<f64> {
        if self.completed == 0 {
            None
        } else {
            Some(self.total_duration_ms as f64 / self.completed as f64)
        }
    }
}

/// Estado transitorio de la ronda actual de un job.
#[derive(Debug, Default)]
struct RoundAccumulator {
    pending_outputs: Vec<String>,
    /// Completados ya volcados acá. El job sólo se cierra cuando esto
    /// iguala la cantidad de tareas del job en el store.
    absorbed: usize,
    metrics: JobMetrics,
}

/// Qué pasó con un completado aceptado.
#[derive(Debug, Clone)]
pub enum Completion {
    /// La salida quedó pendiente esperando a otras.
    Waiting,
    /// Se emitió una nueva tarea de reducción.
    Reduced(Task),
    /// El job terminó.
    Finalized(Job),
}

/// Mensajes cuya publicación falló. El monitor los reintenta con
/// `flush_outbox`.
#[derive(Debug, Default)]
struct Outbox {
    tasks: HashMap<TaskId, Task>,
    outputs: HashMap<JobId, JobOutput>,
}

pub struct Master {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueGateway>,
    finalizer: Arc<dyn OutputFinalizer>,
    config: OrchestratorConfig,
    rounds: Mutex<HashMap<JobId, Arc<AsyncMutex<RoundAccumulator>>>>,
    outbox: Mutex<Outbox>,
}

impl Master {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn QueueGateway>,
        finalizer: Arc<dyn OutputFinalizer>,
        mut config: OrchestratorConfig,
    ) -> Self {
        config.partition_size = config.partition_size.max(1);
        config.reduction_threshold = config.reduction_threshold.max(2);
        Self {
            store,
            queue,
            finalizer,
            config,
            rounds: Mutex::new(HashMap::new()),
            outbox: Mutex::new(Outbox::default()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn rounds(&self) -> MutexGuard<'_, HashMap<JobId, Arc<AsyncMutex<RoundAccumulator>>>> {
        self.rounds.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acumulador del job, creado en el primer completado.
    fn round(&self, job_id: &str) -> Arc<AsyncMutex<RoundAccumulator>> {
        self.rounds().entry(job_id.to_string()).or_default().clone()
    }

    fn discard_round(&self, job_id: &str) {
        self.rounds().remove(job_id);
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn hold_tasks(&self, tasks: &[Task]) {
        let mut outbox = self.outbox();
        for t in tasks {
            outbox.tasks.insert(t.id.clone(), t.clone());
        }
    }

    /* ---------------- operaciones ---------------- */

    /// Crea el job, lo parte en tareas de `partition_size` inputs y publica
    /// todas las tareas en un único lote.
    pub async fn schedule_job(&self, input: Vec<String>) -> Result<Job> {
        if input.is_empty() {
            return Err(MasterError::InvalidInput("input vacío".to_string()));
        }

        let job = self.store.create_job(input).await?;
        info!("job {} creado con {} inputs", job.id, job.input.len());

        let mut tasks = Vec::new();
        for chunk in partition(&job.input, self.config.partition_size) {
            tasks.push(self.store.create_task(&job.id, chunk).await?);
        }
        info!(
            "job {} partido en {} tareas, enviando a la cola {}",
            job.id,
            tasks.len(),
            self.config.worker_queue
        );

        if let Err(e) = publish_json(self.queue.as_ref(), &self.config.worker_queue, &tasks).await {
            error!(
                "job {}: no se pudieron publicar las tareas, quedan para reintento: {}",
                job.id, e
            );
            self.hold_tasks(&tasks);
            return Err(e.into());
        }

        Ok(job)
    }

    /// Un worker toma una tarea. Se permite re-tomar una tarea en progreso
    /// (ejecución especulativa), nunca una completada.
    pub async fn start_task(&self, job_id: &str, task_id: &str) -> Result<Task> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| MasterError::job_not_found(job_id))?;

        if job.status.is_terminal() {
            warn!("job {} ya terminó ({:?}), no se entregan tareas", job_id, job.status);
            return Err(MasterError::job_not_found(job_id));
        }

        self.task_of_job(job_id, task_id).await?;

        match self
            .store
            .conditional_update_task(task_id, TaskStatus::Completed, TaskUpdate::acquire(Utc::now()))
            .await?
        {
            Some(task) => {
                debug!("tarea {} del job {} en progreso", task_id, job_id);
                Ok(task)
            }
            None => {
                warn!("tarea {} ya estaba completada", task_id);
                Err(MasterError::Conflict(format!("tarea {} ya completada", task_id)))
            }
        }
    }

    /// Registra la salida de una tarea y decide el siguiente paso del job.
    ///
    /// Un segundo completado de la misma tarea se rechaza con `Conflict` sin
    /// tocar el acumulador.
    pub async fn complete_task(
        &self,
        job_id: &str,
        task_id: &str,
        output: Vec<String>,
    ) -> Result<Completion> {
        if output.is_empty() {
            return Err(MasterError::InvalidInput("output vacío".to_string()));
        }

        let Some(current) = self.store.get_job(job_id).await? else {
            error!(
                "completado de la tarea {} para el job {} que no existe, probablemente un bug",
                task_id, job_id
            );
            return Err(MasterError::InvariantViolation(format!(
                "job {} inexistente",
                job_id
            )));
        };

        if current.status.is_terminal() {
            warn!("job {} ya terminó, se ignora la tarea {}", job_id, task_id);
            return Err(MasterError::Conflict(format!("job {} ya terminado", job_id)));
        }

        self.task_of_job(job_id, task_id).await?;

        let Some(task) = self
            .store
            .conditional_update_task(
                task_id,
                TaskStatus::Completed,
                TaskUpdate::complete(output.clone(), Utc::now()),
            )
            .await?
        else {
            warn!("tarea {} ya estaba completada, reporte duplicado", task_id);
            return Err(MasterError::Conflict(format!("tarea {} ya completada", task_id)));
        };

        let round = self.round(job_id);
        let mut acc = round.lock().await;

        acc.metrics.record(task.duration_ms);

        // se vuelca la salida completa antes de cualquier I/O: si algo falla
        // más abajo la salida sigue pendiente y no se pierde
        acc.pending_outputs.extend(output);
        acc.absorbed += 1;

        // el job pudo pasar a FAILED mientras se esperaba el lock
        let job = match self.store.get_job(job_id).await? {
            Some(job) if !job.status.is_terminal() => job,
            _ => {
                drop(acc);
                self.discard_round(job_id);
                warn!("job {} terminó durante el completado de {}", job_id, task_id);
                return Err(MasterError::Conflict(format!("job {} ya terminado", job_id)));
            }
        };

        debug!(
            "job {}: {} salidas pendientes tras la tarea {}",
            job_id,
            acc.pending_outputs.len(),
            task_id
        );

        if acc.pending_outputs.len() >= self.config.reduction_threshold {
            let task = self.emit_reduction(job_id, &mut acc).await?;
            return Ok(Completion::Reduced(task));
        }

        let tasks = self.store.get_tasks_for_job(job_id).await?;
        let all_done = acc.absorbed == tasks.len()
            && tasks.iter().all(|t| t.status == TaskStatus::Completed);
        if !all_done {
            return Ok(Completion::Waiting);
        }

        if acc.pending_outputs.len() > 1 {
            // umbral > 2: quedan varias salidas y ninguna tarea más por venir
            let task = self.emit_reduction(job_id, &mut acc).await?;
            return Ok(Completion::Reduced(task));
        }

        self.finalize(&job, &mut acc).await.map(Completion::Finalized)
    }

    /// Un worker reporta que no pudo procesar una tarea: el job pasa a FAILED.
    pub async fn report_failure(&self, job_id: &str, task_id: &str, reason: &str) -> Result<Job> {
        self.task_of_job(job_id, task_id).await?;

        // sin completados todavía no hay acumulador, y no se crea uno
        let round = self.rounds().get(job_id).cloned();
        let _acc = match &round {
            Some(r) => Some(r.lock().await),
            None => None,
        };

        let failed = self
            .store
            .conditional_update_job(job_id, JobUpdate::fail(Utc::now()))
            .await?;
        self.discard_round(job_id);

        let job =
            failed.ok_or_else(|| MasterError::Conflict(format!("job {} ya terminado", job_id)))?;
        warn!("job {} FAILED por la tarea {}: {}", job_id, task_id, reason);
        Ok(job)
    }

    /// Re-publica tareas en la cola de workers (ejecución especulativa).
    pub async fn republish(&self, tasks: &[Task]) -> Result<()> {
        publish_json(self.queue.as_ref(), &self.config.worker_queue, tasks).await?;
        Ok(())
    }

    /// Reintenta lo que quedó sin publicar: tareas de jobs todavía
    /// pendientes y salidas finales. Devuelve cuántos mensajes salieron.
    pub async fn flush_outbox(&self) -> Result<usize> {
        let (held, outputs): (Vec<Task>, Vec<JobOutput>) = {
            let outbox = self.outbox();
            (
                outbox.tasks.values().cloned().collect(),
                outbox.outputs.values().cloned().collect(),
            )
        };
        let mut sent = 0;

        if !held.is_empty() {
            let mut live = Vec::new();
            let mut stale = Vec::new();
            for t in held {
                let job_open = matches!(
                    self.store.get_job(&t.job_id).await?,
                    Some(job) if !job.status.is_terminal()
                );
                let task_open = matches!(
                    self.store.get_task(&t.id).await?,
                    Some(task) if task.status != TaskStatus::Completed
                );
                if job_open && task_open {
                    live.push(t);
                } else {
                    stale.push(t.id);
                }
            }

            {
                let mut outbox = self.outbox();
                for id in &stale {
                    outbox.tasks.remove(id);
                }
            }

            if !live.is_empty() {
                publish_json(self.queue.as_ref(), &self.config.worker_queue, &live).await?;
                let mut outbox = self.outbox();
                for t in &live {
                    outbox.tasks.remove(&t.id);
                }
                info!("re-publicadas {} tareas pendientes de envío", live.len());
                sent += live.len();
            }
        }

        if !outputs.is_empty() {
            publish_json(self.queue.as_ref(), &self.config.output_queue, &outputs).await?;
            let mut outbox = self.outbox();
            for o in &outputs {
                outbox.outputs.remove(&o.job_id);
            }
            info!("re-publicadas {} salidas de jobs", outputs.len());
            sent += outputs.len();
        }

        Ok(sent)
    }

    /* ---------------- lecturas ---------------- */

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| MasterError::job_not_found(job_id))
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.store.list_jobs().await?)
    }

    pub async fn get_tasks_for_job(&self, job_id: &str) -> Result<Vec<Task>> {
        self.get_job(job_id).await?;
        Ok(self.store.get_tasks_for_job(job_id).await?)
    }

    /// `None` si el job todavía no tiene completados (o ya terminó).
    pub async fn job_metrics(&self, job_id: &str) -> Option<JobMetrics> {
        let round = self.rounds().get(job_id).cloned()?;
        let acc = round.lock().await;
        Some(acc.metrics.clone())
    }

    /* ---------------- internos ---------------- */

    async fn task_of_job(&self, job_id: &str, task_id: &str) -> Result<Task> {
        match self.store.get_task(task_id).await? {
            Some(task) if task.job_id == job_id => Ok(task),
            _ => Err(MasterError::task_not_found(task_id)),
        }
    }

    /// Crea y publica una tarea con todas las salidas pendientes.
    async fn emit_reduction(&self, job_id: &str, acc: &mut RoundAccumulator) -> Result<Task> {
        let task = self
            .store
            .create_task(job_id, acc.pending_outputs.clone())
            .await?;
        // la tarea ya existe en el store: las salidas son suyas
        acc.pending_outputs.clear();

        info!(
            "job {}: nueva ronda de reducción, tarea {} con {} salidas",
            job_id,
            task.id,
            task.input.len()
        );

        let batch = std::slice::from_ref(&task);
        if let Err(e) = publish_json(self.queue.as_ref(), &self.config.worker_queue, batch).await {
            error!(
                "job {}: no se pudo publicar la tarea {}, queda para reintento: {}",
                job_id, task.id, e
            );
            self.hold_tasks(batch);
            return Err(e.into());
        }

        Ok(task)
    }

    async fn finalize(&self, job: &Job, acc: &mut RoundAccumulator) -> Result<Job> {
        let divisor = self.config.aggregation.divisor(job.input.len());

        let output = self
            .finalizer
            .finalize(job, acc.pending_outputs.clone(), divisor)
            .await
            .map_err(|e| {
                error!("job {}: falló la combinación final: {}", job.id, e);
                MasterError::Finalize(e)
            })?;

        let Some(done) = self
            .store
            .conditional_update_job(&job.id, JobUpdate::complete(output.clone(), Utc::now()))
            .await?
        else {
            self.discard_round(&job.id);
            warn!("job {} ya estaba terminado, no se cierra de nuevo", job.id);
            return Err(MasterError::Conflict(format!("job {} ya terminado", job.id)));
        };
        acc.pending_outputs.clear();
        // el job es terminal: el acumulador ya no se usa, publique o no
        self.discard_round(&done.id);

        info!(
            "job {} COMPLETED en {:?} ms con salida {:?}",
            done.id, done.duration_ms, output
        );

        let message = JobOutput {
            job_id: done.id.clone(),
            output,
        };
        let batch = std::slice::from_ref(&message);
        if let Err(e) = publish_json(self.queue.as_ref(), &self.config.output_queue, batch).await {
            error!(
                "job {}: no se pudo publicar la salida, queda para reintento: {}",
                done.id, e
            );
            self.outbox().outputs.insert(done.id.clone(), message);
            return Err(e.into());
        }

        debug_assert_eq!(done.status, JobStatus::Completed);
        Ok(done)
    }

    #[cfg(test)]
    async fn pending_outputs(&self, job_id: &str) -> Option<Vec<String>> {
        let round = self.rounds().get(job_id).cloned()?;
        let acc = round.lock().await;
        Some(acc.pending_outputs.clone())
    }
}
