use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::capabilities::{GoogleMapsCapability, Registry, ScrapeSummary, SimpleCapability};
use crate::config::WorkerConfig;
use crate::error::AppError;
use crate::fetch::{BrowserlessClient, HttpFetcher, PageFetcher};
use crate::models::job::Job;
use crate::store::{JobStore, RecordSink};

/// Build the registry of every capability this worker can run. Each
/// capability gets the shared record sink injected here.
pub fn build_registry(
    config: &WorkerConfig,
    sink: Arc<dyn RecordSink>,
) -> Result<Registry, AppError> {
    let browserless = config
        .browserless_url
        .as_deref()
        .map(|url| BrowserlessClient::new(url, config.browserless_token.as_deref()))
        .transpose()?
        .map(Arc::new);

    let fetcher: Arc<dyn PageFetcher> = match &browserless {
        Some(client) => client.clone(),
        None => Arc::new(HttpFetcher::new()?),
    };

    let mut registry = Registry::new().register(Arc::new(SimpleCapability::new(
        fetcher,
        sink.clone(),
    )));

    match browserless {
        Some(client) => {
            registry = registry.register(Arc::new(GoogleMapsCapability::new(
                client,
                sink,
                config.default_limit,
                config.max_scroll_attempts,
            )));
        }
        None => {
            tracing::warn!("BROWSERLESS_URL not set; google_maps jobs will fail as unregistered");
        }
    }

    Ok(registry)
}

/// Main worker entry point: recover abandoned jobs, then run `concurrency`
/// claim loops until SIGINT.
pub async fn run(
    jobs: Arc<dyn JobStore>,
    registry: Arc<Registry>,
    config: &WorkerConfig,
) -> anyhow::Result<()> {
    let poll_interval = Duration::from_secs(config.poll_interval);
    let job_timeout = Duration::from_secs(config.job_timeout);
    let runner = Runner::new(jobs, registry, poll_interval, job_timeout);

    match runner.jobs.fail_abandoned().await {
        Ok(0) => {}
        Ok(n) => tracing::warn!("Failed {n} abandoned 'running' jobs"),
        Err(e) => tracing::error!("Could not recover abandoned jobs: {e}"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, finishing current jobs");
            let _ = shutdown_tx.send(true);
        }
    });

    tracing::info!(
        "Worker started with {} loop(s) for types {:?}, polling every {}s",
        config.concurrency,
        runner.registry.job_types(),
        config.poll_interval
    );

    let mut loops = Vec::with_capacity(config.concurrency);
    for worker in 0..config.concurrency.max(1) {
        let runner = runner.clone();
        let shutdown = shutdown_rx.clone();
        loops.push(tokio::spawn(async move {
            runner.run_loop(worker, shutdown).await
        }));
    }

    for handle in loops {
        handle.await?;
    }
    tracing::info!("Worker stopped");
    Ok(())
}

/// One claim and dispatch loop. Cheap to clone; clones share the store and
/// registry.
#[derive(Clone)]
pub struct Runner {
    jobs: Arc<dyn JobStore>,
    registry: Arc<Registry>,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl Runner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        registry: Arc<Registry>,
        poll_interval: Duration,
        job_timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            registry,
            poll_interval,
            job_timeout,
        }
    }

    /// Poll until `shutdown` flips to true. Shutdown is only observed between
    /// jobs; a claimed job always reaches a terminal state first.
    pub async fn run_loop(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(worker, "Worker poll failed: {e}");
                }
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        tracing::info!(worker, "Worker loop exited");
    }

    /// Claim and process at most one job. Returns whether a job was claimed;
    /// errors are store errors from the claim itself.
    pub async fn tick(&self) -> Result<bool, AppError> {
        let Some(job) = self.jobs.claim_next(self.lease()).await? else {
            return Ok(false);
        };
        tracing::info!("Claimed job {} ({})", job.id, job.job_type());
        self.process(&job).await;
        Ok(true)
    }

    /// Time a claim is held before other workers may fail the job as
    /// abandoned: the job timeout plus one poll of slack for finalizing.
    fn lease(&self) -> Duration {
        self.job_timeout + self.poll_interval
    }

    async fn process(&self, job: &Job) {
        let started = Instant::now();
        let written = match self.execute(job).await {
            Ok(summary) => {
                tracing::info!(
                    "Job {} completed in {:?}: {} written ({} new, {} updated), {} skipped",
                    job.id,
                    started.elapsed(),
                    summary.count(),
                    summary.inserted,
                    summary.updated,
                    summary.skipped
                );
                let count = i32::try_from(summary.count()).unwrap_or(i32::MAX);
                self.jobs.complete(job.id, count).await
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!("Job {} failed: {error}", job.id);
                self.jobs.fail(job.id, &error).await
            }
        };

        if let Err(e) = written {
            // Left running; recovered as abandoned once its deadline passes.
            tracing::error!("Could not finalize job {}: {e}", job.id);
        }
    }

    async fn execute(&self, job: &Job) -> Result<ScrapeSummary, AppError> {
        let capability = self.registry.resolve(job.job_type(), &job.payload)?;
        match tokio::time::timeout(self.job_timeout, capability.run(&job.payload)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.job_timeout)),
        }
    }
}
