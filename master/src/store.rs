//! Store de jobs y tareas.
//!
//! El orquestador sólo habla con el trait `JobStore`; si el respaldo es un
//! mapa en memoria o una base de datos es un detalle de la implementación.
//! Las actualizaciones condicionales son el compare-and-set que evita
//! completar dos veces la misma tarea.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{duration_ms, Job, JobId, JobStatus, Task, TaskId, TaskStatus};

use crate::error::StoreError;

/// Campos a modificar en una tarea. `None` = no tocar.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub output: Option<Vec<String>>,
}

impl TaskUpdate {
    /// PENDING/IN_PROGRESS -> IN_PROGRESS, con nuevo start_time.
    pub fn acquire(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::InProgress),
            start_time: Some(now),
            ..Default::default()
        }
    }

    pub fn complete(output: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            end_time: Some(now),
            output: Some(output),
            ..Default::default()
        }
    }

    fn apply(self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(start) = self.start_time {
            task.start_time = Some(start);
        }
        if let Some(end) = self.end_time {
            task.end_time = Some(end);
            // una tarea completada sin haber sido adquirida cuenta desde el fin
            let start = *task.start_time.get_or_insert(end);
            task.duration_ms = Some(duration_ms(start, end));
        }
        if let Some(output) = self.output {
            task.output = Some(output);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub end_time: Option<DateTime<Utc>>,
    pub output: Option<Vec<String>>,
}

impl JobUpdate {
    pub fn complete(output: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            end_time: Some(now),
            output: Some(output),
        }
    }

    pub fn fail(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            end_time: Some(now),
            output: None,
        }
    }

    fn apply(self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(end) = self.end_time {
            job.end_time = Some(end);
            job.duration_ms = Some(duration_ms(job.start_time, end));
        }
        if let Some(output) = self.output {
            job.output = Some(output);
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, input: Vec<String>) -> Result<Job, StoreError>;

    async fn create_task(&self, job_id: &str, input: Vec<String>) -> Result<Task, StoreError>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError>;

    async fn get_tasks_for_job(&self, job_id: &str) -> Result<Vec<Task>, StoreError>;

    /// Aplica `update` sólo si la tarea existe y su estado NO es
    /// `expected_not`. Devuelve la tarea actualizada o `None`.
    async fn conditional_update_task(
        &self,
        id: &str,
        expected_not: TaskStatus,
        update: TaskUpdate,
    ) -> Result<Option<Task>, StoreError>;

    /// Aplica `update` sólo si el job existe y sigue PENDING
    /// (un job terminal nunca retrocede).
    async fn conditional_update_job(
        &self,
        id: &str,
        update: JobUpdate,
    ) -> Result<Option<Job>, StoreError>;
}

/// Store en memoria. Cada operación es una única sección crítica, así el
/// chequeo de estado y la escritura son atómicos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    tasks: Mutex<HashMap<TaskId, Task>>,
    // orden de creación de las tareas de cada job
    tasks_by_job: Mutex<HashMap<JobId, Vec<TaskId>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
        m.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, input: Vec<String>) -> Result<Job, StoreError> {
        let job = Job::new(input);
        Self::lock(&self.jobs)?.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn create_task(&self, job_id: &str, input: Vec<String>) -> Result<Task, StoreError> {
        let task = Task::new(job_id.to_string(), input);
        Self::lock(&self.tasks)?.insert(task.id.clone(), task.clone());
        Self::lock(&self.tasks_by_job)?
            .entry(job_id.to_string())
            .or_default()
            .push(task.id.clone());
        Ok(task)
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(Self::lock(&self.jobs)?.get(id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = Self::lock(&self.jobs)?.values().cloned().collect();
        jobs.sort_by_key(|j| j.start_time);
        Ok(jobs)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(Self::lock(&self.tasks)?.get(id).cloned())
    }

    async fn get_tasks_for_job(&self, job_id: &str) -> Result<Vec<Task>, StoreError> {
        let ids = Self::lock(&self.tasks_by_job)?
            .get(job_id)
            .cloned()
            .unwrap_or_default();
        let tasks = Self::lock(&self.tasks)?;
        Ok(ids.iter().filter_map(|id| tasks.get(id).cloned()).collect())
    }

    async fn conditional_update_task(
        &self,
        id: &str,
        expected_not: TaskStatus,
        update: TaskUpdate,
    ) -> Result<Option<Task>, StoreError> {
        let mut tasks = Self::lock(&self.tasks)?;
        match tasks.get_mut(id) {
            Some(task) if task.status != expected_not => {
                update.apply(task);
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn conditional_update_job(
        &self,
        id: &str,
        update: JobUpdate,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = Self::lock(&self.jobs)?;
        match jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Pending => {
                update.apply(job);
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }
}
