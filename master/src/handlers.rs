use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{
    Job, JobRequest, Task, TaskCompleteRequest, TaskCompleteResponse, TaskFailRequest, Worker,
    WorkerDeactivateResponse, WorkerInitRequest, WorkerInitResponse, WorkerStatusRequest,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::MasterError;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        .route("/api/v1/jobs", post(create_job).get(list_jobs))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/tasks", get(get_job_tasks))
        .route("/api/v1/jobs/:job_id/tasks/:task_id/start", post(start_task))
        .route("/api/v1/jobs/:job_id/tasks/:task_id/complete", post(complete_task))
        .route("/api/v1/jobs/:job_id/tasks/:task_id/fail", post(fail_task))
        .route(
            "/api/v1/workers",
            post(init_workers).get(list_workers).delete(deactivate_workers),
        )
        .route("/api/v1/workers/:id/status", post(update_worker_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- errores ---------------- */

/// Error HTTP con cuerpo `{ "error": ... }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<MasterError> for ApiError {
    fn from(e: MasterError) -> Self {
        let status = match &e {
            MasterError::NotFound { .. } | MasterError::InvariantViolation(_) => {
                StatusCode::NOT_FOUND
            }
            MasterError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            MasterError::Conflict(_) => StatusCode::CONFLICT,
            MasterError::Store(_) | MasterError::Queue(_) | MasterError::Finalize(_) => {
                error!("error interno: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn create_job(State(state): State<AppState>, Json(req): Json<JobRequest>) -> ApiResult<Job> {
    let job = state.master.schedule_job(req.input).await?;
    info!("POST /jobs -> job {}", job.id);
    Ok(Json(job))
}

async fn list_jobs(State(state): State<AppState>) -> ApiResult<Vec<Job>> {
    Ok(Json(state.master.list_jobs().await?))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Job> {
    Ok(Json(state.master.get_job(&id).await?))
}

async fn get_job_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Task>> {
    Ok(Json(state.master.get_tasks_for_job(&id).await?))
}

// Un worker toma una tarea. Cualquier rechazo es 404.
async fn start_task(
    State(state): State<AppState>,
    Path((job_id, task_id)): Path<(String, String)>,
) -> ApiResult<Task> {
    match state.master.start_task(&job_id, &task_id).await {
        Ok(task) => Ok(Json(task)),
        Err(MasterError::Conflict(msg)) => Err(ApiError::new(StatusCode::NOT_FOUND, msg)),
        Err(e) => Err(e.into()),
    }
}

// Un reporte duplicado no es un error para el worker: 200 con ok=false.
async fn complete_task(
    State(state): State<AppState>,
    Path((job_id, task_id)): Path<(String, String)>,
    Json(req): Json<TaskCompleteRequest>,
) -> ApiResult<TaskCompleteResponse> {
    match state.master.complete_task(&job_id, &task_id, req.output).await {
        Ok(_) => Ok(Json(TaskCompleteResponse { ok: true })),
        Err(MasterError::Conflict(_)) => Ok(Json(TaskCompleteResponse { ok: false })),
        Err(e) => Err(e.into()),
    }
}

async fn fail_task(
    State(state): State<AppState>,
    Path((job_id, task_id)): Path<(String, String)>,
    Json(req): Json<TaskFailRequest>,
) -> ApiResult<Job> {
    Ok(Json(
        state
            .master
            .report_failure(&job_id, &task_id, &req.reason)
            .await?,
    ))
}

async fn init_workers(
    State(state): State<AppState>,
    Json(req): Json<WorkerInitRequest>,
) -> ApiResult<WorkerInitResponse> {
    if req.num_workers == 0 {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "numWorkers tiene que ser mayor a 0",
        ));
    }
    Ok(Json(state.pool.init(req.num_workers as usize).await))
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<Worker>> {
    Json(state.pool.list_workers())
}

async fn deactivate_workers(State(state): State<AppState>) -> Json<WorkerDeactivateResponse> {
    Json(state.pool.deactivate().await)
}

async fn update_worker_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<WorkerStatusRequest>,
) -> ApiResult<Worker> {
    state
        .pool
        .update_worker_status(&id, req.status)
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("worker {} no encontrado", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::finalize::Passthrough;
    use crate::orchestrator::{Master, OrchestratorConfig};
    use crate::pool::tests::FakeBackend;
    use crate::pool::WorkerPool;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;

    fn app() -> (Router, Arc<MemoryQueue>) {
        let queue = Arc::new(MemoryQueue::new());
        let master = Arc::new(Master::new(
            Arc::new(MemoryStore::new()),
            queue.clone(),
            Arc::new(Passthrough),
            OrchestratorConfig::default(),
        ));
        let pool = Arc::new(WorkerPool::new(Arc::new(FakeBackend::default()), vec![]));
        (build_router(AppState::new(master, pool)), queue)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn ciclo_completo_de_un_job_por_http() {
        let (app, queue) = app();

        let (status, job) = call(
            &app,
            "POST",
            "/api/v1/jobs",
            Some(json!({ "input": ["a", "b", "c", "d", "e", "f"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "PENDING");
        let job_id = job["id"].as_str().unwrap().to_string();

        let (status, tasks) = call(&app, "GET", &format!("/api/v1/jobs/{}/tasks", job_id), None).await;
        assert_eq!(status, StatusCode::OK);
        let tasks = tasks.as_array().unwrap().clone();
        assert_eq!(tasks.len(), 2);

        for (i, task) in tasks.iter().enumerate() {
            let task_id = task["id"].as_str().unwrap();
            let base = format!("/api/v1/jobs/{}/tasks/{}", job_id, task_id);

            let (status, started) = call(&app, "POST", &format!("{}/start", base), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(started["status"], "IN_PROGRESS");

            let (status, res) = call(
                &app,
                "POST",
                &format!("{}/complete", base),
                Some(json!({ "output": [format!("x{}", i + 1)] })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(res, json!({ "ok": true }));
        }

        let reduction = queue.messages("worker-queue").last().cloned().unwrap();
        let base = format!(
            "/api/v1/jobs/{}/tasks/{}",
            job_id,
            reduction["id"].as_str().unwrap()
        );
        let (_, res) = call(
            &app,
            "POST",
            &format!("{}/complete", base),
            Some(json!({ "output": ["final"] })),
        )
        .await;
        assert_eq!(res, json!({ "ok": true }));

        // duplicado: 200 con ok=false
        let (status, res) = call(
            &app,
            "POST",
            &format!("{}/complete", base),
            Some(json!({ "output": ["final"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(res, json!({ "ok": false }));

        let (_, job) = call(&app, "GET", &format!("/api/v1/jobs/{}", job_id), None).await;
        assert_eq!(job["status"], "COMPLETED");
        assert_eq!(job["output"], json!(["final"]));

        // job terminado: start rechazado
        let (status, _) = call(&app, "POST", &format!("{}/start", base), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn errores_de_entrada_y_ids_desconocidos() {
        let (app, _) = app();

        let (status, body) = call(&app, "POST", "/api/v1/jobs", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = call(&app, "GET", "/api/v1/jobs/nada", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "GET", "/api/v1/jobs/nada/tasks", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/jobs/nada/tasks/t/complete",
            Some(json!({ "output": ["x"] })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "POST", "/api/v1/jobs/nada/tasks/t/start", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn output_vacio_es_400() {
        let (app, queue) = app();
        let (_, job) = call(&app, "POST", "/api/v1/jobs", Some(json!({ "input": ["a"] }))).await;
        let task = queue.messages("worker-queue")[0].clone();
        let uri = format!(
            "/api/v1/jobs/{}/tasks/{}/complete",
            job["id"].as_str().unwrap(),
            task["id"].as_str().unwrap()
        );

        let (status, _) = call(&app, "POST", &uri, Some(json!({ "output": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn fail_marca_el_job_y_un_segundo_fail_es_409() {
        let (app, queue) = app();
        let (_, job) = call(&app, "POST", "/api/v1/jobs", Some(json!({ "input": ["a"] }))).await;
        let task = queue.messages("worker-queue")[0].clone();
        let uri = format!(
            "/api/v1/jobs/{}/tasks/{}/fail",
            job["id"].as_str().unwrap(),
            task["id"].as_str().unwrap()
        );

        let (status, failed) = call(&app, "POST", &uri, Some(json!({ "reason": "oom" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(failed["status"], "FAILED");

        let (status, _) = call(&app, "POST", &uri, Some(json!({ "reason": "oom" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn workers_init_listado_estado_y_baja() {
        let (app, _) = app();

        let (status, _) = call(&app, "POST", "/api/v1/workers", Some(json!({ "numWorkers": 0 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, res) = call(&app, "POST", "/api/v1/workers", Some(json!({ "numWorkers": 2 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(res["workers"].as_array().unwrap().len(), 2);
        assert_eq!(res["failures"], json!([]));

        let id = res["workers"][0]["id"].as_str().unwrap().to_string();
        let (status, worker) = call(
            &app,
            "POST",
            &format!("/api/v1/workers/{}/status", id),
            Some(json!({ "status": "BUSY" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(worker["status"], "BUSY");

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/workers/nadie/status",
            Some(json!({ "status": "IDLE" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, listed) = call(&app, "GET", "/api/v1/workers", None).await;
        assert_eq!(listed.as_array().unwrap().len(), 2);

        let (status, down) = call(&app, "DELETE", "/api/v1/workers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(down["removed"].as_array().unwrap().len(), 2);

        let (_, listed) = call(&app, "GET", "/api/v1/workers", None).await;
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn health_responde_ok() {
        let (app, _) = app();
        let res = app
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
