//! Pool de workers.
//!
//! Crea y destruye procesos worker en el orquestador de contenedores y
//! lleva la contabilidad IDLE/BUSY. No asigna tareas: los workers las toman
//! solos de la cola.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use common::{
    new_id, Worker, WorkerDeactivateResponse, WorkerFailure, WorkerId, WorkerInitResponse,
    WorkerStatus,
};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::PoolError;

/// Llamadas al orquestador de contenedores. Cada una puede fallar sola.
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    /// Crea el proceso del worker `id` y devuelve un handle del backend.
    async fn create_worker_process(
        &self,
        id: &str,
        env: &[(String, String)],
    ) -> Result<String, PoolError>;

    async fn delete_worker_process(&self, id: &str) -> Result<(), PoolError>;
}

pub struct WorkerPool {
    backend: Arc<dyn WorkerBackend>,
    /// Variables comunes a todos los workers (API_HOST, credenciales, ...)
    env: Vec<(String, String)>,
    workers: Mutex<HashMap<WorkerId, Worker>>,
}

impl WorkerPool {
    pub fn new(backend: Arc<dyn WorkerBackend>, env: Vec<(String, String)>) -> Self {
        Self {
            backend,
            env,
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<WorkerId, Worker>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn env_for(&self, id: &str) -> Vec<(String, String)> {
        let mut env = vec![("WORKER_ID".to_string(), id.to_string())];
        env.extend(self.env.iter().cloned());
        env
    }

    /// Lanza `n` workers en paralelo. Sólo se registran los que el backend
    /// confirmó; cada falla se reporta por separado.
    pub async fn init(&self, n: usize) -> WorkerInitResponse {
        let creations = (0..n).map(|_| {
            let id = new_id();
            let env = self.env_for(&id);
            async move {
                let res = self.backend.create_worker_process(&id, &env).await;
                (id, res)
            }
        });

        let mut workers = Vec::new();
        let mut failures = Vec::new();

        for (id, res) in join_all(creations).await {
            match res {
                Ok(handle) => {
                    debug!("worker {} creado (handle={})", id, handle);
                    workers.push(Worker {
                        id,
                        status: WorkerStatus::Idle,
                    });
                }
                Err(e) => {
                    warn!("no se pudo crear el worker {}: {}", id, e);
                    failures.push(WorkerFailure {
                        worker_id: id,
                        error: e.to_string(),
                    });
                }
            }
        }

        {
            let mut tracked = self.workers();
            for w in &workers {
                tracked.insert(w.id.clone(), w.clone());
            }
        }

        info!(
            "pool: {} workers creados, {} fallidos (pedidos {})",
            workers.len(),
            failures.len(),
            n
        );
        WorkerInitResponse { workers, failures }
    }

    /// Borra todos los workers registrados. Los que no se pudieron borrar
    /// siguen en el pool (todavía existen).
    pub async fn deactivate(&self) -> WorkerDeactivateResponse {
        let ids: Vec<WorkerId> = self.workers().keys().cloned().collect();

        let deletions = ids.into_iter().map(|id| async move {
            let res = self.backend.delete_worker_process(&id).await;
            (id, res)
        });

        let mut removed = Vec::new();
        let mut failures = Vec::new();

        for (id, res) in join_all(deletions).await {
            match res {
                Ok(()) => removed.push(id),
                Err(e) => {
                    warn!("no se pudo borrar el worker {}: {}", id, e);
                    failures.push(WorkerFailure {
                        worker_id: id,
                        error: e.to_string(),
                    });
                }
            }
        }

        {
            let mut tracked = self.workers();
            for id in &removed {
                tracked.remove(id);
            }
        }

        info!(
            "pool: {} workers borrados, {} fallidos",
            removed.len(),
            failures.len()
        );
        WorkerDeactivateResponse { removed, failures }
    }

    /// Reporte del propio worker. `None` si no está en el pool.
    pub fn update_worker_status(&self, id: &str, status: WorkerStatus) -> Option<Worker> {
        let mut tracked = self.workers();
        let worker = tracked.get_mut(id)?;
        worker.status = status;
        Some(worker.clone())
    }

    pub fn list_workers(&self) -> Vec<Worker> {
        let mut out: Vec<Worker> = self.workers().values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

/* ---------------- Docker ---------------- */

#[derive(Debug, Clone)]
pub struct DockerConfig {
    pub image: String,
    /// Red de docker donde viven el master y el broker
    pub network: Option<String>,
}

/// Un contenedor `worker-<id>` por worker, con label `role=worker`.
pub struct DockerBackend {
    docker: Docker,
    config: DockerConfig,
}

impl DockerBackend {
    pub fn connect(config: DockerConfig) -> Result<Self, PoolError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| PoolError::Unavailable(e.to_string()))?;
        Ok(Self { docker, config })
    }

    fn container_name(id: &str) -> String {
        format!("worker-{}", id)
    }

    async fn remove(&self, name: &str) -> Result<(), bollard::errors::Error> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(name, Some(options)).await
    }
}

#[async_trait]
impl WorkerBackend for DockerBackend {
    async fn create_worker_process(
        &self,
        id: &str,
        env: &[(String, String)],
    ) -> Result<String, PoolError> {
        let name = Self::container_name(id);

        let labels = HashMap::from([
            ("role".to_string(), "worker".to_string()),
            ("worker-id".to_string(), id.to_string()),
        ]);

        let config = Config {
            image: Some(self.config.image.clone()),
            env: Some(env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()),
            labels: Some(labels),
            host_config: Some(HostConfig {
                network_mode: self.config.network.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| PoolError::Create {
                worker_id: id.to_string(),
                reason: e.to_string(),
            })?;

        if let Err(e) = self
            .docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
        {
            // un contenedor creado pero no arrancado no cuenta como worker
            if let Err(rm) = self.remove(&name).await {
                warn!("no se pudo limpiar el contenedor {}: {}", name, rm);
            }
            return Err(PoolError::Create {
                worker_id: id.to_string(),
                reason: e.to_string(),
            });
        }

        Ok(created.id)
    }

    async fn delete_worker_process(&self, id: &str) -> Result<(), PoolError> {
        self.remove(&Self::container_name(id))
            .await
            .map_err(|e| PoolError::Delete {
                worker_id: id.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend falso: falla la creación número `fail_create_at` (1-based) y
    /// el borrado de los ids en `fail_delete`.
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub(crate) fail_create_at: Option<usize>,
        pub(crate) fail_delete: Mutex<HashSet<String>>,
        pub(crate) created: Mutex<Vec<(String, Vec<(String, String)>)>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WorkerBackend for FakeBackend {
        async fn create_worker_process(
            &self,
            id: &str,
            env: &[(String, String)],
        ) -> Result<String, PoolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(n) == self.fail_create_at {
                return Err(PoolError::Create {
                    worker_id: id.to_string(),
                    reason: "sin cuota".to_string(),
                });
            }
            self.created
                .lock()
                .unwrap()
                .push((id.to_string(), env.to_vec()));
            Ok(format!("handle-{}", id))
        }

        async fn delete_worker_process(&self, id: &str) -> Result<(), PoolError> {
            if self.fail_delete.lock().unwrap().contains(id) {
                return Err(PoolError::Delete {
                    worker_id: id.to_string(),
                    reason: "timeout".to_string(),
                });
            }
            Ok(())
        }
    }

    fn pool(backend: Arc<FakeBackend>) -> WorkerPool {
        WorkerPool::new(
            backend,
            vec![("API_HOST".to_string(), "http://master:8080".to_string())],
        )
    }

    #[tokio::test]
    async fn init_crea_todos_los_workers_en_idle() {
        let backend = Arc::new(FakeBackend::default());
        let pool = pool(backend.clone());

        let res = pool.init(3).await;

        assert_eq!(res.workers.len(), 3);
        assert!(res.failures.is_empty());
        assert!(res.workers.iter().all(|w| w.status == WorkerStatus::Idle));
        assert_eq!(pool.list_workers().len(), 3);

        // cada worker recibe su id y las variables comunes
        let created = backend.created.lock().unwrap();
        for (id, env) in created.iter() {
            assert!(env.contains(&("WORKER_ID".to_string(), id.clone())));
            assert!(env.iter().any(|(k, _)| k == "API_HOST"));
        }
    }

    #[tokio::test]
    async fn init_parcial_solo_registra_los_que_existen() {
        let backend = Arc::new(FakeBackend {
            fail_create_at: Some(2),
            ..Default::default()
        });
        let pool = pool(backend);

        let res = pool.init(3).await;

        assert_eq!(res.workers.len(), 2);
        assert_eq!(res.failures.len(), 1);
        let tracked: HashSet<_> = pool.list_workers().into_iter().map(|w| w.id).collect();
        assert_eq!(tracked.len(), 2);
        assert!(!tracked.contains(&res.failures[0].worker_id));
    }

    #[tokio::test]
    async fn deactivate_deja_los_que_no_se_pudieron_borrar() {
        let backend = Arc::new(FakeBackend::default());
        let pool = pool(backend.clone());
        let res = pool.init(3).await;
        let stuck = res.workers[0].id.clone();
        backend.fail_delete.lock().unwrap().insert(stuck.clone());

        let down = pool.deactivate().await;

        assert_eq!(down.removed.len(), 2);
        assert_eq!(down.failures.len(), 1);
        assert_eq!(down.failures[0].worker_id, stuck);
        let left = pool.list_workers();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, stuck);
    }

    #[tokio::test]
    async fn update_worker_status_de_worker_desconocido_es_none() {
        let pool = pool(Arc::new(FakeBackend::default()));
        let res = pool.init(1).await;
        let id = res.workers[0].id.clone();

        let updated = pool.update_worker_status(&id, WorkerStatus::Busy).unwrap();
        assert_eq!(updated.status, WorkerStatus::Busy);
        assert!(pool.update_worker_status("nadie", WorkerStatus::Busy).is_none());
    }
}
