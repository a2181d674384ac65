use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{JobStatus, Task, TaskId, TaskStatus};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::Result;
use crate::orchestrator::{JobMetrics, Master};

/// Tareas IN_PROGRESS que llevan más de `factor` veces el promedio de las
/// tareas ya completadas del job. Sin promedio no hay rezagados.
pub fn find_stragglers(
    tasks: &[Task],
    metrics: &JobMetrics,
    factor: f64,
    now: DateTime<Utc>,
) -> Vec<Task> {
    let Some(avg) = metrics.average_ms() else {
        return Vec::new();
    };
    let limit = avg * factor;

    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::InProgress)
        .filter(|t| match t.start_time {
            Some(start) => (now - start).num_milliseconds() as f64 > limit,
            None => false,
        })
        .cloned()
        .collect()
}

/// Loop de fondo del master. En cada vuelta reintenta los mensajes que no
/// se pudieron publicar y, si hay `speculative_factor`, re-publica los
/// rezagados de los jobs pendientes. Los duplicados son inofensivos porque
/// completar es idempotente.
pub async fn run_monitor(master: Arc<Master>, interval: Duration, speculative_factor: Option<f64>) {
    match speculative_factor {
        Some(factor) => info!(
            "monitor activo (cada {:?}, rezagados con factor {})",
            interval, factor
        ),
        None => info!("monitor activo (cada {:?}, sin ejecución especulativa)", interval),
    }
    // tarea -> start_time con el que ya se re-publicó
    let mut republished: HashMap<TaskId, DateTime<Utc>> = HashMap::new();

    loop {
        sleep(interval).await;

        if let Err(e) = tick(&master, speculative_factor, &mut republished).await {
            warn!("error en la pasada del monitor: {}", e);
        }
    }
}

/// Una vuelta del monitor. Devuelve cuántos mensajes se publicaron.
pub async fn tick(
    master: &Master,
    speculative_factor: Option<f64>,
    republished: &mut HashMap<TaskId, DateTime<Utc>>,
) -> Result<usize> {
    let mut sent = master.flush_outbox().await?;
    if let Some(factor) = speculative_factor {
        sent += sweep_once(master, factor, republished).await?;
    }
    Ok(sent)
}

/// Una pasada. Devuelve cuántas tareas se re-publicaron.
pub async fn sweep_once(
    master: &Master,
    factor: f64,
    republished: &mut HashMap<TaskId, DateTime<Utc>>,
) -> Result<usize> {
    let now = Utc::now();
    let mut in_progress = Vec::new();
    let mut count = 0;

    for job in master.list_jobs().await? {
        if job.status != JobStatus::Pending {
            continue;
        }
        let Some(metrics) = master.job_metrics(&job.id).await else {
            continue;
        };

        let tasks = master.get_tasks_for_job(&job.id).await?;
        in_progress.extend(
            tasks
                .iter()
                .filter(|t| t.status == TaskStatus::InProgress)
                .map(|t| t.id.clone()),
        );

        // una sola re-publicación por cada vez que la tarea se toma
        let stragglers: Vec<Task> = find_stragglers(&tasks, &metrics, factor, now)
            .into_iter()
            .filter(|t| republished.get(&t.id) != t.start_time.as_ref())
            .collect();
        if stragglers.is_empty() {
            continue;
        }

        for t in &stragglers {
            info!(
                "tarea {} del job {} rezagada (promedio {:?} ms), re-publicando",
                t.id,
                t.job_id,
                metrics.average_ms()
            );
        }
        master.republish(&stragglers).await?;

        for t in stragglers {
            if let Some(start) = t.start_time {
                republished.insert(t.id, start);
            }
            count += 1;
        }
    }

    republished.retain(|id, _| in_progress.contains(id));
    Ok(count)
}
