use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{
    Job, JobRequest, Task, TaskCompleteRequest, TaskCompleteResponse, TaskFailRequest, Worker,
    WorkerDeactivateResponse, WorkerInitRequest, WorkerInitResponse, WorkerStatus,
    WorkerStatusRequest,
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Envía un job nuevo con una lista de referencias de entrada
    Submit {
        #[arg(value_name = "INPUT")]
        input: Vec<String>,

        /// Lee las referencias de un archivo (una por línea)
        #[arg(long, value_name = "ARCHIVO")]
        from_file: Option<PathBuf>,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Lista todos los jobs
    Jobs,
    /// Lista las tareas de un job (incluidas las de reducción)
    Tasks {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Marca una tarea como tomada (lo que haría un worker)
    Start {
        job_id: String,
        task_id: String,
    },
    /// Reporta la salida de una tarea (lo que haría un worker)
    Complete {
        job_id: String,
        task_id: String,
        #[arg(value_name = "OUTPUT", required = true)]
        output: Vec<String>,
    },
    /// Reporta que una tarea no se pudo procesar: el job pasa a FAILED
    Fail {
        job_id: String,
        task_id: String,
        reason: String,
    },
    /// Lista los workers del pool
    Workers,
    /// Levanta N workers
    WorkersInit {
        #[arg(value_name = "N")]
        num_workers: u32,
    },
    /// Da de baja todos los workers
    WorkersDown,
    /// Actualiza el estado de un worker (idle | busy)
    WorkerStatus {
        id: String,
        #[arg(value_parser = parse_worker_status)]
        status: WorkerStatus,
    },
}

fn parse_worker_status(s: &str) -> Result<WorkerStatus, String> {
    match s.to_ascii_lowercase().as_str() {
        "idle" => Ok(WorkerStatus::Idle),
        "busy" => Ok(WorkerStatus::Busy),
        other => Err(format!("estado inválido '{}', usar idle o busy", other)),
    }
}

/// Referencias del archivo, ignorando líneas vacías.
fn read_input_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("no se pudo leer {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Decodifica el cuerpo si la respuesta es 2xx; si no, falla con el error
/// que mandó el master.
async fn parse<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    let msg = body["error"].as_str().unwrap_or("sin detalle");
    bail!("el master respondió {}: {}", status, msg)
}

fn print_job(job: &Job) {
    println!("Job:");
    println!("  id: {}", job.id);
    println!("  estado: {:?}", job.status);
    println!("  inputs: {}", job.input.len());
    println!("  inicio: {}", job.start_time);
    if let Some(end) = job.end_time {
        println!("  fin: {}", end);
    }
    if let Some(ms) = job.duration_ms {
        println!("  duración: {} ms", ms);
    }
    if let Some(output) = &job.output {
        println!("  salida: {}", output.join(", "));
    }
}

fn print_workers(workers: &[Worker]) {
    if workers.is_empty() {
        println!("No hay workers registrados.");
        return;
    }
    for w in workers {
        println!("  {}  {:?}", w.id, w.status);
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();

    match cli.command {
        Commands::Submit { input, from_file } => {
            let mut input = input;
            if let Some(path) = from_file {
                input.extend(read_input_file(&path)?);
            }
            if input.is_empty() {
                bail!("el job necesita al menos una referencia de entrada");
            }

            let url = format!("{}/api/v1/jobs", base_url);
            let resp = client.post(&url).json(&JobRequest { input }).send().await?;
            let job: Job = parse(resp).await?;

            println!("Job creado:");
            println!("  id: {}", job.id);
            println!("  estado: {:?}", job.status);
            println!("  inputs: {}", job.input.len());
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/jobs/{}", base_url, id);
            let job: Job = parse(client.get(&url).send().await?).await?;
            print_job(&job);
        }

        Commands::Jobs => {
            let url = format!("{}/api/v1/jobs", base_url);
            let jobs: Vec<Job> = parse(client.get(&url).send().await?).await?;
            if jobs.is_empty() {
                println!("No hay jobs.");
            }
            for job in jobs {
                println!("  {}  {:?}  inputs={}", job.id, job.status, job.input.len());
            }
        }

        Commands::Tasks { id } => {
            let url = format!("{}/api/v1/jobs/{}/tasks", base_url, id);
            let tasks: Vec<Task> = parse(client.get(&url).send().await?).await?;
            println!("Tareas del job {} ({}):", id, tasks.len());
            for t in tasks {
                let ms = t
                    .duration_ms
                    .map(|d| format!("{} ms", d))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {}  {:?}  inputs={}  duración={}",
                    t.id,
                    t.status,
                    t.input.len(),
                    ms
                );
            }
        }

        Commands::Start { job_id, task_id } => {
            let url = format!("{}/api/v1/jobs/{}/tasks/{}/start", base_url, job_id, task_id);
            let task: Task = parse(client.post(&url).send().await?).await?;
            println!("Tarea {} {:?}", task.id, task.status);
        }

        Commands::Complete {
            job_id,
            task_id,
            output,
        } => {
            let url = format!(
                "{}/api/v1/jobs/{}/tasks/{}/complete",
                base_url, job_id, task_id
            );
            let resp = client
                .post(&url)
                .json(&TaskCompleteRequest { output })
                .send()
                .await?;
            let res: TaskCompleteResponse = parse(resp).await?;
            if res.ok {
                println!("Tarea {} completada.", task_id);
            } else {
                println!("La tarea {} ya estaba completada (reporte ignorado).", task_id);
            }
        }

        Commands::Fail {
            job_id,
            task_id,
            reason,
        } => {
            let url = format!("{}/api/v1/jobs/{}/tasks/{}/fail", base_url, job_id, task_id);
            let resp = client
                .post(&url)
                .json(&TaskFailRequest { reason })
                .send()
                .await?;
            let job: Job = parse(resp).await?;
            print_job(&job);
        }

        Commands::Workers => {
            let url = format!("{}/api/v1/workers", base_url);
            let workers: Vec<Worker> = parse(client.get(&url).send().await?).await?;
            print_workers(&workers);
        }

        Commands::WorkersInit { num_workers } => {
            let url = format!("{}/api/v1/workers", base_url);
            let resp = client
                .post(&url)
                .json(&WorkerInitRequest { num_workers })
                .send()
                .await?;
            let res: WorkerInitResponse = parse(resp).await?;

            println!("Workers creados: {}", res.workers.len());
            print_workers(&res.workers);
            for f in res.failures {
                println!("  FALLÓ {}: {}", f.worker_id, f.error);
            }
        }

        Commands::WorkersDown => {
            let url = format!("{}/api/v1/workers", base_url);
            let res: WorkerDeactivateResponse = parse(client.delete(&url).send().await?).await?;

            println!("Workers borrados: {}", res.removed.len());
            for f in res.failures {
                println!("  FALLÓ {}: {}", f.worker_id, f.error);
            }
        }

        Commands::WorkerStatus { id, status } => {
            let url = format!("{}/api/v1/workers/{}/status", base_url, id);
            let resp = client
                .post(&url)
                .json(&WorkerStatusRequest { status })
                .send()
                .await?;
            let worker: Worker = parse(resp).await?;
            println!("Worker {} ahora {:?}", worker.id, worker.status);
        }
    }

    Ok(())
}
