use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::ProcessJob;

struct Running {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs [`ProcessJob`] on a fixed interval, one item at a time.
pub struct QueueProcessor {
    job: Arc<ProcessJob>,
    interval: Duration,
    running: Option<Running>,
}

impl QueueProcessor {
    #[must_use]
    pub fn new(job: Arc<ProcessJob>, interval: Duration) -> Self {
        Self {
            job,
            interval,
            running: None,
        }
    }

    /// Start ticking. Does nothing if already running.
    pub fn start(&mut self) {
        if self.running.is_some() {
            warn!("Queue processor already running");
            return;
        }
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.job),
            self.interval,
            shutdown.clone(),
        ));
        self.running = Some(Running { shutdown, handle });
    }

    /// Ask the loop to stop and wait for the in-flight tick to finish.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.shutdown.cancel();
        if let Err(e) = running.handle.await {
            error!("Queue processor task failed: {e}");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

async fn run_loop(job: Arc<ProcessJob>, interval: Duration, shutdown: CancellationToken) {
    info!(
        interval_ms = interval.as_millis() as u64,
        "Starting queue processor"
    );

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }

        match job.execute().await {
            Ok(Some(outcome)) => debug!(?outcome, "Queue tick finished"),
            Ok(None) => {}
            Err(e) => error!("Queue tick failed: {e:#}"),
        }
    }

    info!("Queue processor stopped");
}
