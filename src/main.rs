// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use aim_engine::{
    constants::{
        DEFAULT_RECONCILE_TIMEOUT_SECS, HEALTH_SERVER_PATH, MAX_CONCURRENT_DISCOVERY_JOBS,
        METRICS_SERVER_BIND_ADDRESS, METRICS_SERVER_PATH, METRICS_SERVER_PORT,
        TOKIO_WORKER_THREADS,
    },
    context::{Context, Stores},
    controller::{
        run_aimmodelcache_controller, run_aimservicetemplate_controller,
        run_aimtemplatecache_controller,
    },
    crd::AIMTemplateCache,
    metrics,
    reconcilers::semaphore::{initialize_semaphore_from_cluster, DiscoverySemaphore},
};
use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use futures::StreamExt;
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Kubernetes control plane for AI model-serving workloads
#[derive(Parser, Debug)]
#[command(name = "aim-engine", version, about, long_about = None)]
struct Args {
    /// Discovery jobs allowed to run at once across the cluster
    #[arg(long, env = "AIM_MAX_DISCOVERY_JOBS", default_value_t = MAX_CONCURRENT_DISCOVERY_JOBS)]
    max_discovery_jobs: usize,

    /// Port serving /metrics and /healthz
    #[arg(long, env = "AIM_METRICS_PORT", default_value_t = METRICS_SERVER_PORT)]
    metrics_port: u16,

    /// Upper bound on a single reconcile pass, in seconds
    #[arg(long, env = "AIM_RECONCILE_TIMEOUT_SECS", default_value_t = DEFAULT_RECONCILE_TIMEOUT_SECS)]
    reconcile_timeout_secs: u64,

    /// Tokio worker threads
    #[arg(long, default_value_t = TOKIO_WORKER_THREADS)]
    worker_threads: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.worker_threads)
        .thread_name("aim-engine-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

fn init_tracing() {
    // Respects RUST_LOG if set, otherwise defaults to INFO level.
    // RUST_LOG_FORMAT=json switches to JSON output.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(args: Args) -> Result<()> {
    init_tracing();

    info!(
        max_discovery_jobs = args.max_discovery_jobs,
        metrics_port = args.metrics_port,
        reconcile_timeout_secs = args.reconcile_timeout_secs,
        "Starting AIM engine"
    );

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let semaphore = Arc::new(DiscoverySemaphore::new(args.max_discovery_jobs));
    if let Err(e) = initialize_semaphore_from_cluster(&semaphore, &client).await {
        // Running discovery jobs are still found and released by their templates.
        warn!(error = %e, "Could not restore discovery slots from cluster state");
    }

    let (template_cache_store, template_cache_writer) = reflector::store::<AIMTemplateCache>();
    let stores = Stores {
        template_caches: template_cache_store.clone(),
    };
    let context = Arc::new(Context::new(
        client.clone(),
        stores,
        semaphore,
        Duration::from_secs(args.reconcile_timeout_secs),
    ));

    let template_cache_reflector = reflector::reflector(
        template_cache_writer,
        watcher(
            Api::<AIMTemplateCache>::all(client),
            watcher::Config::default(),
        ),
    )
    .default_backoff()
    .touched_objects()
    .for_each(|_| futures::future::ready(()));

    info!("Starting all controllers");

    // Controllers should never exit - if one fails, we log it and exit the main process
    tokio::select! {
        () = template_cache_reflector => {
            error!("CRITICAL: AIMTemplateCache reflector exited unexpectedly");
            anyhow::bail!("AIMTemplateCache reflector exited unexpectedly")
        }
        result = run_controllers(context, template_cache_store) => {
            error!("CRITICAL: controllers exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Controllers exited unexpectedly without error")
        }
        result = run_metrics_server(args.metrics_port) => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Metrics server exited unexpectedly without error")
        }
        result = shutdown_signal() => {
            result?;
            info!("Graceful shutdown completed successfully");
            Ok(())
        }
    }
}

/// Run every controller once the template cache store has seen its initial list,
/// so watch mappers do not drop events while it is empty.
async fn run_controllers(context: Arc<Context>, store: Store<AIMTemplateCache>) -> Result<()> {
    if let Err(e) = store.wait_until_ready().await {
        warn!(error = %e, "AIMTemplateCache store did not become ready");
    }
    debug!("AIMTemplateCache store ready");

    tokio::try_join!(
        run_aimmodelcache_controller(context.clone()),
        run_aimtemplatecache_controller(context.clone()),
        run_aimservicetemplate_controller(context),
    )?;
    Ok(())
}

/// Resolve when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received SIGINT, initiating graceful shutdown...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM (pod termination), initiating graceful shutdown...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating graceful shutdown...");
    }
    Ok(())
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn metrics_router() -> Router {
    Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route(HEALTH_SERVER_PATH, get(|| async { "ok" }))
}

/// Serve Prometheus metrics and the liveness probe.
async fn run_metrics_server(port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((METRICS_SERVER_BIND_ADDRESS, port)).await?;
    info!(
        address = %METRICS_SERVER_BIND_ADDRESS,
        port,
        "Metrics server listening on {METRICS_SERVER_PATH} and {HEALTH_SERVER_PATH}"
    );
    axum::serve(listener, metrics_router()).await?;
    Ok(())
}
