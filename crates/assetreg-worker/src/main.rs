//! assetreg OCR worker.
//!
//! Runs one or more lease schedulers against the shared job table until the
//! process receives Ctrl+C or SIGTERM.

use std::sync::Arc;

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use assetreg_core::{Error, OcrProvider};
use assetreg_db::{log_pool_metrics, Database, PoolConfig};
use assetreg_jobs::{LeaseScheduler, SchedulerConfig, SchedulerEvent};
use assetreg_ocr::OcrProviderClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let _file_guard = init_tracing();

    let database_url = required_database_url(std::env::var("DATABASE_URL").ok())?;
    let run_migrations = std::env::var("RUN_MIGRATIONS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);

    let base_config = SchedulerConfig::from_env();
    base_config.validate()?;

    info!("Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    info!("Database connected");

    if run_migrations {
        info!("Running database migrations...");
        db.migrate().await?;
        info!("Database migrations complete");
    }

    let provider: Arc<dyn OcrProvider> = Arc::new(OcrProviderClient::from_env()?);

    if !base_config.enabled {
        warn!("OCR worker disabled (OCR_WORKER_ENABLED=false), exiting");
        return Ok(());
    }

    let mut handles = Vec::with_capacity(base_config.worker_count);
    for config in instance_configs(&base_config) {
        config.validate()?;
        let worker_id = config.worker_id.clone();
        let scheduler = LeaseScheduler::for_database(&db, provider.clone(), config);
        let events = scheduler.events();
        handles.push(scheduler.start()?);
        tokio::spawn(log_events(events));
        info!(worker_id = %worker_id, "OCR scheduler instance started");
    }

    info!(
        instances = handles.len(),
        provider = provider.name(),
        "OCR worker running"
    );

    shutdown_signal().await;

    for handle in handles {
        if let Err(e) = handle.stop().await {
            warn!(error = %e, "OCR scheduler did not stop cleanly");
        }
    }
    log_pool_metrics(db.pool());
    info!("OCR worker shutdown complete");
    Ok(())
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "assetreg_worker=info,assetreg_jobs=info")
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "assetreg_worker=info,assetreg_jobs=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("assetreg-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files by default
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

/// `DATABASE_URL` is required; there is no implicit local default.
fn required_database_url(value: Option<String>) -> Result<String, Error> {
    value
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| Error::Config("DATABASE_URL must be set".to_string()))
}

/// Per-instance configs: `OCR_WORKER_COUNT` copies with distinct lease owners.
fn instance_configs(base: &SchedulerConfig) -> Vec<SchedulerConfig> {
    if base.worker_count <= 1 {
        return vec![base.clone()];
    }
    (0..base.worker_count)
        .map(|i| {
            base.clone()
                .with_worker_id(format!("{}#{i}", base.worker_id))
        })
        .collect()
}

/// Log settled jobs and loop faults until the scheduler goes away.
async fn log_events(mut events: tokio::sync::broadcast::Receiver<SchedulerEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok(SchedulerEvent::JobSettled {
                job_id,
                document_id,
                status,
            }) => info!(
                subsystem = "worker",
                job_id = %job_id,
                document_id = %document_id,
                status = %status,
                "OCR job settled"
            ),
            Ok(SchedulerEvent::WorkerStopped { worker_id }) => {
                info!(subsystem = "worker", worker_id = %worker_id, "OCR scheduler instance stopped");
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(subsystem = "worker", skipped, "Scheduler event log lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_url_is_required() {
        assert!(matches!(required_database_url(None), Err(Error::Config(_))));
        assert!(matches!(
            required_database_url(Some("  ".to_string())),
            Err(Error::Config(_))
        ));
        assert_eq!(
            required_database_url(Some("postgres://db/assetreg".to_string())).unwrap(),
            "postgres://db/assetreg"
        );
    }

    #[test]
    fn test_single_instance_keeps_worker_id() {
        let base = SchedulerConfig::default().with_worker_id("host:abc");
        let configs = instance_configs(&base);
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].worker_id, "host:abc");
    }

    #[test]
    fn test_instances_get_distinct_worker_ids() {
        let base = SchedulerConfig::default()
            .with_worker_id("host:abc")
            .with_worker_count(3);
        let ids: Vec<String> = instance_configs(&base)
            .into_iter()
            .map(|c| c.worker_id)
            .collect();
        assert_eq!(ids, vec!["host:abc#0", "host:abc#1", "host:abc#2"]);
    }
}
