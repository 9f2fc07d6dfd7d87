mod app_state;
mod config;
mod models;
mod pipeline;
mod routes;
mod services;

use axum::response::Html;
use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::{AppConfig, PathConfig};
use pipeline::{IngestionPipeline, PipelineSettings};
use services::imagegen::ImageGenClient;
use services::prompts::PromptCatalog;
use services::vision::VisionClient;

/// Console plus a non-blocking plain-text log file in the logs directory.
/// The returned guard must stay alive for the file writer to flush.
fn init_tracing(logs_dir: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(logs_dir, "app.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    guard
}

fn fatal(message: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{message}: {err}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    // Configuration problems must be reported before any watcher starts.
    let config = AppConfig::from_env()
        .unwrap_or_else(|e| fatal("Configuration error (check environment / .env)", e));

    let paths = PathConfig::resolve(&config)
        .unwrap_or_else(|e| fatal("Failed to resolve working directories", e));
    paths
        .ensure_dirs()
        .unwrap_or_else(|e| fatal("Failed to create working directories", e));

    let _log_guard = init_tracing(&paths.logs_dir);

    tracing::info!(
        inbox = %paths.inbox_dir.display(),
        outbox = %paths.outbox_dir.display(),
        workers = config.worker_count,
        queue_capacity = config.queue_capacity,
        "Starting dreamshot"
    );

    // Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .unwrap_or_else(|e| fatal("Failed to install Prometheus metrics recorder", e));
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "pipeline_items_total",
        "Screenshots and manual requests processed to completion"
    );
    metrics::describe_counter!("pipeline_items_failed", "Items abandoned after failure");
    metrics::describe_counter!(
        "pipeline_events_dropped",
        "Inbox events dropped because the queue was full"
    );
    metrics::describe_gauge!("pipeline_queue_depth", "Jobs currently waiting in the queue");
    metrics::describe_histogram!(
        "pipeline_processing_seconds",
        "End-to-end time to process one screenshot"
    );

    let vision = VisionClient::new(&config)
        .unwrap_or_else(|e| fatal("Failed to initialize vision client", e));
    let imagegen = ImageGenClient::new(&config)
        .unwrap_or_else(|e| fatal("Failed to initialize generation client", e));
    let catalog = PromptCatalog::new();

    let pipeline = IngestionPipeline::new(
        paths.clone(),
        Arc::new(vision),
        Arc::new(imagegen),
        catalog.clone(),
        PipelineSettings::from_config(&config),
    );
    let handle = pipeline.handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pipeline_task = tokio::spawn(pipeline.run(shutdown_rx.clone()));

    let state = AppState::new(Arc::new(paths), catalog, handle);

    let app = Router::new()
        // Static UI (embedded at compile time)
        .route("/", get(|| async { Html(include_str!("../static/index.html")) }))
        // API endpoints
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/gallery", get(routes::gallery::list_gallery))
        .route("/api/v1/gallery/{filename}", get(routes::gallery::fetch_image))
        .route("/api/v1/generate", post(routes::gallery::submit_generation))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|e| fatal(&format!("Failed to bind to {}", config.bind_addr), e));

    tracing::info!("Web surface listening on http://{}", config.bind_addr);

    let mut server_shutdown = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                // Resolves when the supervisor flips the shutdown flag.
                while !*server_shutdown.borrow() {
                    if server_shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Server error");
        }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received, stopping"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
    let _ = shutdown_tx.send(true);

    // Let in-flight items finish, bounded by the grace period.
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let mut pipeline_task = pipeline_task;
    if tokio::time::timeout(grace, &mut pipeline_task).await.is_err() {
        tracing::warn!(
            grace_secs = config.shutdown_grace_secs,
            "Pipeline did not drain within the grace period, aborting"
        );
        pipeline_task.abort();
    }
    let _ = server_task.await;

    tracing::info!("Stopped");
}
