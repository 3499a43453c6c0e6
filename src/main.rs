//! Game client update distribution service.

use clap::{Parser, Subcommand};
use eupdate::{api, cache, config::Config, db, pipeline, queue, storage};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "eupdate")]
#[command(about = "Game client update distribution service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API (REST + gRPC) and, if `UPDATES_QUEUE_PROCESS` >= 1, the
    /// pipeline worker pool, all in one process.
    Serve,
    /// Run database migrations and exit.
    Migrate,
    /// Run only the pipeline worker pool (for deployments that split web and
    /// worker processes).
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eupdate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve => run_serve(config).await?,
        Commands::Migrate => run_migrate(config).await?,
        Commands::Worker => run_worker(config).await?,
    }

    Ok(())
}

async fn build_app_state(config: &Config) -> anyhow::Result<api::AppState> {
    let pool = db::create_pool(&config.database_url).await?;

    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;

    let storage = storage::Storage::new(&config.input_storage, &config.output_storage)?;
    let queue = queue::JobQueue::new(redis_conn.clone(), config.updates_queue_name.clone());
    let cache = cache::ManifestCache::new(redis_conn);

    Ok(api::AppState::new(
        pool,
        std::sync::Arc::new(storage),
        queue,
        cache,
        config.clone(),
    ))
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    let state = build_app_state(&config).await?;
    tracing::info!("checking database migrations");
    db::run_migrations(&state.db).await?;

    let api_addr = config.api_addr();
    let grpc_addr = config.grpc_addr();

    let api_state = state.clone();
    let api_handle = tokio::spawn(async move {
        tracing::info!(%api_addr, "REST API listening");
        api::rest::serve(api_addr, api_state).await
    });

    let grpc_state = state.clone();
    let grpc_handle = tokio::spawn(async move {
        tracing::info!(%grpc_addr, "gRPC listening");
        api::grpc::serve(grpc_addr, grpc_state).await
    });

    let worker_handles = spawn_workers(&config, &state);

    tokio::select! {
        result = api_handle => result??,
        result = grpc_handle => result??,
    }

    for handle in worker_handles {
        handle.abort();
    }

    Ok(())
}

async fn run_migrate(config: Config) -> anyhow::Result<()> {
    tracing::info!("running migrations");
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("migrations complete");
    Ok(())
}

async fn run_worker(config: Config) -> anyhow::Result<()> {
    let state = build_app_state(&config).await?;
    let handles = spawn_workers(&config, &state);
    if handles.is_empty() {
        anyhow::bail!("UPDATES_QUEUE_PROCESS is 0; nothing to run as a worker-only process");
    }
    futures::future::join_all(handles).await;
    Ok(())
}

/// One `Worker::run` loop per `UPDATES_QUEUE_PROCESS` (§5: a pool of one or
/// more worker processes/tasks, each leasing jobs sequentially).
fn spawn_workers(config: &Config, state: &api::AppState) -> Vec<tokio::task::JoinHandle<()>> {
    (0..config.updates_queue_process)
        .map(|i| {
            let worker = pipeline::Worker {
                db: state.db.clone(),
                storage: state.storage.clone(),
                queue: state.queue.clone(),
                cache: state.cache.clone(),
            };
            tokio::spawn(async move {
                tracing::info!(worker = i, "pipeline worker starting");
                worker.run().await;
            })
        })
        .collect()
}
