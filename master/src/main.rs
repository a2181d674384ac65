use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use master::config::{Args, FinalizerKind, QueueBackend};
use master::finalize::{CsvScale, OutputFinalizer, Passthrough};
use master::pool::{DockerBackend, DockerConfig, WorkerPool};
use master::queue::{MemoryQueue, QueueGateway, RabbitMqGateway};
use master::storage::LocalStore;
use master::store::MemoryStore;
use master::{handlers, monitor, AppState, Master};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,tower_http=info")),
        )
        .init();

    let args = Args::parse();

    let queue: Arc<dyn QueueGateway> = match args.queue_backend {
        QueueBackend::Amqp => {
            info!("cola AMQP en {}", args.amqp_url);
            Arc::new(RabbitMqGateway::new(args.amqp_url.clone()))
        }
        QueueBackend::Memory => {
            warn!("usando cola en memoria: los workers no van a recibir tareas");
            Arc::new(MemoryQueue::new())
        }
    };

    let finalizer: Arc<dyn OutputFinalizer> = match args.finalizer {
        FinalizerKind::Passthrough => Arc::new(Passthrough),
        FinalizerKind::CsvScale => {
            info!("combinación final csv-scale en {}", args.storage_root.display());
            Arc::new(CsvScale::new(Arc::new(LocalStore::new(args.storage_root.clone()))))
        }
    };

    let master = Arc::new(Master::new(
        Arc::new(MemoryStore::new()),
        queue,
        finalizer,
        args.orchestrator(),
    ));

    let backend = DockerBackend::connect(DockerConfig {
        image: args.worker_image.clone(),
        network: args.worker_network.clone(),
    })
    .context("no se pudo conectar con docker")?;
    let pool = Arc::new(WorkerPool::new(Arc::new(backend), args.worker_env()));

    // reintentos de publicación y, si se pidió, ejecución especulativa
    let monitor_master = master.clone();
    let interval = args.monitor_interval();
    let factor = args.speculative_factor;
    tokio::spawn(async move {
        monitor::run_monitor(monitor_master, interval, factor).await;
    });

    let app = handlers::build_router(AppState::new(master, pool));

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("no se pudo abrir el puerto {}", args.port))?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
