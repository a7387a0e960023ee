use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::signal;
use tonic::transport::Server as TonicServer;
use tracing_subscriber::EnvFilter;

use sentra_common::proto::event_relay_server::EventRelayServer;
use sentra_notify::plugin::ChannelRegistry;
use sentra_storage::Store;

use sentra_server::app;
use sentra_server::bus::{spawn_bus_logger, Bus};
use sentra_server::config::Config;
use sentra_server::grpc::EventRelayService;
use sentra_server::jobs::aggregation::AggregationJob;
use sentra_server::jobs::lock::DistributeLockManager;
use sentra_server::jobs::recovery::RecoveryJob;
use sentra_server::jobs::scheduler::Scheduler;
use sentra_server::jobs::trigger::TriggerJob;
use sentra_server::queue::QueueManager;
use sentra_server::state::AppState;
use sentra_server::template_seed;

const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_FATAL: i32 = 2;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  sentra-server [config.json]                Start the server");
    eprintln!("  sentra-server check-config <config.json>   Validate configuration");
    eprintln!("  sentra-server aggregate <config.json>      Run one aggregation pass and exit");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sentra=info")),
        )
        .init();

    sentra_common::id::init(1, 1);

    let args: Vec<String> = std::env::args().collect();

    let code = match args.get(1).map(|s| s.as_str()) {
        Some("--help" | "-h") => {
            print_usage();
            0
        }
        Some("check-config") => match args.get(2) {
            Some(path) => run_check_config(path),
            None => {
                print_usage();
                EXIT_CONFIG_ERROR
            }
        },
        Some("aggregate") => match args.get(2) {
            Some(path) => run_aggregate_once(path).await,
            None => {
                print_usage();
                EXIT_CONFIG_ERROR
            }
        },
        path => {
            let path = path.unwrap_or("config.json");
            run_server(path).await
        }
    };

    std::process::exit(code);
}

#[allow(clippy::print_stdout, clippy::print_stderr)]
fn run_check_config(path: &str) -> i32 {
    match Config::load(path) {
        Ok(config) => {
            println!("{}", config.serialize());
            0
        }
        Err(e) => {
            eprintln!("invalid config {path}: {e}");
            EXIT_CONFIG_ERROR
        }
    }
}

/// One-shot aggregation for operators and cron-style deployments. Runs
/// without taking the lease: the caller decides when it is safe.
async fn run_aggregate_once(path: &str) -> i32 {
    let config = match Config::load(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, path, "config load failed");
            return EXIT_CONFIG_ERROR;
        }
    };

    let result: Result<()> = async {
        let store = Arc::new(Store::connect(&config.database_url).await?);
        let bus = Bus::new();
        let job = AggregationJob::new(store, bus);
        job.run_once().await
    }
    .await;

    match result {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "one-shot aggregation failed");
            EXIT_FATAL
        }
    }
}

async fn run_server(path: &str) -> i32 {
    let config = match Config::load(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, path, "config load failed");
            return EXIT_CONFIG_ERROR;
        }
    };

    match serve(config).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            EXIT_FATAL
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!(
        listen = %config.listen,
        grpc_listen = %config.grpc_listen,
        aggregation_period = config.aggregation_period,
        action_trigger_period = config.action_trigger_period,
        "sentra-server starting"
    );

    // Build components; store connectivity is fatal at boot.
    let store = Arc::new(Store::connect(&config.database_url).await?);
    let config = Arc::new(config);

    if config.migrate {
        if let Err(e) = template_seed::seed_templates(&store).await {
            tracing::error!(error = %e, "template seeding failed");
        }
    }

    let bus = Bus::new();
    let bus_logger = spawn_bus_logger(&bus);

    let queue = Arc::new(QueueManager::new(
        store.clone(),
        ChannelRegistry::default(),
        config.queue_job_max_retry_times,
        config.queue_worker_num,
    ));
    let worker_handles = queue.start_workers();

    let state = AppState {
        store: store.clone(),
        bus: bus.clone(),
        queue: queue.clone(),
        config: config.clone(),
        start_time: Utc::now(),
    };

    // Scheduler with leader election: owner is host(listen), matching what
    // operators see in the locks collection.
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "sentra".to_string());
    let lock = Arc::new(DistributeLockManager::new(
        store.clone(),
        format!("{}({})", hostname, config.listen),
    ));
    let scheduler = Scheduler::new(
        lock.clone(),
        Arc::new(AggregationJob::new(store.clone(), bus.clone())),
        Arc::new(TriggerJob::new(
            store.clone(),
            queue.clone(),
            config.preview_url.clone(),
        )),
        Arc::new(RecoveryJob::new(store.clone())),
        bus.clone(),
        config.aggregation_period,
        config.action_trigger_period,
    );
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run().await;
    });

    // HTTP server
    let http_addr: SocketAddr = config.listen.parse()?;
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let http_server = axum::serve(http_listener, app::build_http_app(state.clone()));

    // gRPC relay
    let grpc_addr: SocketAddr = config.grpc_listen.parse()?;
    let grpc_server = TonicServer::builder()
        .add_service(EventRelayServer::new(EventRelayService::new(state.clone())))
        .serve(grpc_addr);

    tracing::info!(http = %http_addr, grpc = %grpc_addr, "server started");

    tokio::select! {
        result = http_server.with_graceful_shutdown(async { signal::ctrl_c().await.ok(); }) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        result = grpc_server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "gRPC server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("shutting down gracefully");
        }
    }

    // Release leadership before exiting so the next leader takes over
    // without waiting out the TTL.
    if let Err(e) = lock.try_unlock().await {
        tracing::warn!(error = %e, "lease release failed");
    }

    scheduler_handle.abort();
    for handle in worker_handles {
        handle.abort();
    }
    bus_logger.abort();

    tracing::info!("server stopped");
    Ok(())
}
