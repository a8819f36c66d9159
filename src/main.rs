use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use evidence_preserver::capture::chromium::{ChromiumConfig, ChromiumLauncher};
use evidence_preserver::capture::ytdlp::YtDlpVideoDownloader;
use evidence_preserver::capture::{CaptureOptions, PreserveEvidence};
use evidence_preserver::config::Config;
use evidence_preserver::db::{count_evidences_by_status, Database, Vault};
use evidence_preserver::http::HttpClient;
use evidence_preserver::pipeline::{ProcessJob, QueueProcessor};
use evidence_preserver::shell::TokioCommandRunner;
use evidence_preserver::tsa::{TsaService, TsaTrust};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting evidence-preserver worker");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(tsa_url = %config.tsa_url, "Configuration loaded");
    if !config.verifies_receipts() {
        warn!("TSA_CA_FILE/TSA_CERT_FILE not set; timestamp receipts will not be verified");
    }

    for dir in [
        &config.data_path,
        &config.trusted_timestamps_path,
        &config.cookies_path,
    ] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    info!("Database initialized");

    let vault = Arc::new(Vault::new(db.clone()));

    // No item can be in flight before the worker starts
    let interrupted = vault
        .fail_interrupted()
        .await
        .context("Failed to recover interrupted evidences")?;
    if interrupted > 0 {
        warn!(count = interrupted, "Failed evidences interrupted by a previous run");
    }

    for (status, count) in count_evidences_by_status(db.pool()).await? {
        info!(status = %status, count, "Evidence queue");
    }

    let http = Arc::new(HttpClient::new(config.http_timeout)?);
    let tsa_runner = Arc::new(TokioCommandRunner::new(config.http_timeout));
    let video_runner = Arc::new(TokioCommandRunner::new(config.video_download_timeout));

    let mut tsa = TsaService::new(
        tsa_runner,
        http.clone(),
        &config.openssl_path,
        &config.tsa_url,
        &config.trusted_timestamps_path,
    );
    if let (Some(ca_file), Some(cert_file)) = (&config.tsa_ca_file, &config.tsa_cert_file) {
        tsa = tsa.with_trust(TsaTrust {
            ca_file: ca_file.clone(),
            cert_file: cert_file.clone(),
        });
    }

    let capture = Arc::new(PreserveEvidence::new(
        http,
        Arc::new(ChromiumLauncher::new(ChromiumConfig::from(&config))),
        Arc::new(YtDlpVideoDownloader::new(
            video_runner,
            &config.video_downloader_path,
        )),
        &config.data_path,
        &config.cookies_path,
        CaptureOptions {
            step_timeout: config.step_timeout,
        },
    ));

    let job = Arc::new(ProcessJob::new(
        vault,
        capture,
        Arc::new(tsa),
        &config.data_path,
        &config.trusted_timestamps_path,
    ));

    let mut queue = QueueProcessor::new(job, config.poll_interval);
    queue.start();
    info!("Preserve jobs started");

    shutdown_signal().await;

    info!("Shutting down, waiting for the current job to finish...");
    queue.stop().await;

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,evidence_preserver=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
