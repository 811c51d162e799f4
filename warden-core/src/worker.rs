//! Queue consumers.
//!
//! A [`Worker`] runs `concurrency` consumer tasks per queue. Each task
//! reserves one job at a time, runs it to completion and reports the outcome
//! to the broker. Shutdown stops reservations, lets in-flight jobs finish and
//! then releases the engines' rendering sessions.

use crate::crawl::{CrawlEngine, plan_follow_ups};
use crate::error::Result;
use crate::model::{
    CrawlJob, CrawlJobResult, CrawlSummary, ExploitJob, JobReport, JobStatus, QueueName, ScanConfig, ScanEvent,
};
use crate::queue::{Dispatcher, FailDisposition, JobBroker, ReservedJob};
use crate::signals::{SignalStore, transition};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use warden_scanner::{ExploitExecutor, ExploitOutcome};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Consumer tasks per queue.
    pub concurrency: usize,
    /// Longest a consumer blocks waiting for a job before rechecking shutdown.
    pub poll_interval: Duration,
    /// Enqueue links of crawled pages as deeper crawl jobs.
    pub follow_links: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_secs(2),
            follow_links: true,
        }
    }
}

/// Cloneable trigger for a graceful worker shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct Worker {
    crawl_engine: Arc<CrawlEngine>,
    exploit_executor: Arc<ExploitExecutor>,
    signals: Arc<dyn SignalStore>,
    broker: Arc<dyn JobBroker>,
    dispatcher: Dispatcher,
    settings: WorkerSettings,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Worker {
    pub fn new(
        crawl_engine: Arc<CrawlEngine>,
        exploit_executor: Arc<ExploitExecutor>,
        signals: Arc<dyn SignalStore>,
        dispatcher: Dispatcher,
        settings: WorkerSettings,
    ) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            crawl_engine,
            exploit_executor,
            signals,
            broker: dispatcher.broker().clone(),
            dispatcher,
            settings,
            shutdown: Arc::new(tx),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    /// Run one crawl job. A stop flag present at start cancels the job before
    /// any page is opened.
    pub async fn handle_crawl(&self, job: &CrawlJob) -> Result<CrawlJobResult> {
        let config = job.effective_config()?;
        let scan_id = job.scan_id.as_str();

        if self.signals.is_stop_requested(scan_id).await? {
            info!(scan_id = %scan_id, "Scan was cancelled, skipping {}", config.url);
            self.record(scan_id, ScanEvent::AcknowledgeStop).await;
            return Ok(CrawlJobResult::Cancelled);
        }

        self.record(scan_id, ScanEvent::Start).await;

        let mut summary = match self.crawl_engine.process_url(&config, scan_id).await {
            Ok(summary) => summary,
            Err(e) => {
                self.record(scan_id, ScanEvent::Fail).await;
                return Err(e);
            }
        };

        if self.settings.follow_links {
            summary.follow_ups = self.enqueue_follow_ups(job, &config, &summary).await;
        }

        self.record(scan_id, ScanEvent::Finish).await;
        Ok(CrawlJobResult::Success(summary))
    }

    /// Claim and enqueue the next depth level. Failures here are logged; the
    /// page itself was crawled.
    async fn enqueue_follow_ups(&self, job: &CrawlJob, config: &ScanConfig, summary: &CrawlSummary) -> usize {
        let scan_id = job.scan_id.as_str();
        if let Err(e) = self.signals.claim_url(scan_id, &config.url).await {
            warn!(scan_id = %scan_id, "Could not mark {} visited: {}", config.url, e);
        }

        let mut enqueued = 0;
        for follow_up in plan_follow_ups(job, config, &summary.links) {
            let Some(url) = follow_up.url.as_deref() else {
                continue;
            };

            match self.signals.claim_url(scan_id, url).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Already visited {}", url);
                    continue;
                }
                Err(e) => {
                    warn!(scan_id = %scan_id, "Could not claim {}: {}", url, e);
                    continue;
                }
            }

            match self.dispatcher.enqueue_crawl_job(&follow_up).await {
                Ok(_) => enqueued += 1,
                Err(e) => warn!(scan_id = %scan_id, "Failed to enqueue follow-up {}: {}", url, e),
            }
        }

        if enqueued > 0 {
            info!(scan_id = %scan_id, "Enqueued {} follow-up crawls at depth {}", enqueued, job.depth + 1);
        }
        enqueued
    }

    pub async fn handle_exploit(&self, job: &ExploitJob) -> ExploitOutcome {
        info!(scan_id = %job.scan_id, "Starting exploit against {}", job.url);
        self.exploit_executor
            .execute_payload(&job.url, &job.payload, &job.attack_type)
            .await
    }

    /// Scan state is bookkeeping; a failed update never fails the job.
    async fn record(&self, scan_id: &str, event: ScanEvent) {
        if let Err(e) = transition(self.signals.as_ref(), scan_id, event).await {
            warn!(scan_id = %scan_id, "Scan state not updated on {}: {}", event, e);
        }
    }

    /// Run a reserved job and report its terminal state to the broker.
    pub async fn process(&self, reserved: ReservedJob) {
        let job = &reserved.envelope;
        let job_id = job.id.as_str();
        debug!(job_id = %job_id, queue = %job.queue, "Job is now active");

        let outcome = match job.queue {
            QueueName::Crawler => self.run_crawl_payload(&job.payload).await,
            QueueName::Exploit => self.run_exploit_payload(&job.payload).await,
        };

        let reported = match outcome {
            Ok((status, result)) => {
                info!(job_id = %job_id, queue = %job.queue, "Job {}", status.as_str());
                self.broker
                    .complete(&reserved, &JobReport::finished(job, status, result))
                    .await
            }
            Err(e) => {
                error!(job_id = %job_id, queue = %job.queue, "Job failed: {}", e);
                match self.broker.fail(&reserved, &e.to_string()).await {
                    Ok(FailDisposition::Retried { attempt }) => {
                        info!(job_id = %job_id, "Requeued for attempt {} of {}", attempt + 1, job.max_attempts);
                        Ok(())
                    }
                    Ok(FailDisposition::Parked) => {
                        warn!(job_id = %job_id, "Out of attempts, moved to failed list");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = reported {
            error!(job_id = %job_id, "Could not report job outcome: {}", e);
        }
    }

    async fn run_crawl_payload(&self, payload: &serde_json::Value) -> Result<(JobStatus, serde_json::Value)> {
        let job: CrawlJob = serde_json::from_value(payload.clone())?;
        let result = self.handle_crawl(&job).await?;
        let status = if result.is_cancelled() {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        Ok((status, serde_json::to_value(&result)?))
    }

    async fn run_exploit_payload(&self, payload: &serde_json::Value) -> Result<(JobStatus, serde_json::Value)> {
        let job: ExploitJob = serde_json::from_value(payload.clone())?;
        let outcome = self.handle_exploit(&job).await;
        Ok((JobStatus::Completed, serde_json::to_value(&outcome)?))
    }

    /// Consume both queues until shutdown is triggered, then drain and release
    /// the engines.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let concurrency = self.settings.concurrency.max(1);
        info!(
            "Worker started: {} consumers per queue, follow links: {}",
            concurrency, self.settings.follow_links
        );

        let mut consumers = Vec::new();
        for queue in QueueName::ALL {
            for slot in 0..concurrency {
                let worker = Arc::clone(&self);
                consumers.push(tokio::spawn(async move { worker.consume(queue, slot).await }));
            }
        }

        for consumer in consumers {
            if let Err(e) = consumer.await {
                error!("Consumer task panicked: {}", e);
            }
        }

        info!("All consumers stopped, releasing engines");
        if let Err(e) = self.crawl_engine.shutdown().await {
            warn!("Crawl engine shutdown failed: {}", e);
        }
        if let Err(e) = self.exploit_executor.shutdown().await {
            warn!("Exploit executor shutdown failed: {}", e);
        }
        info!("Worker stopped");
        Ok(())
    }

    async fn consume(&self, queue: QueueName, slot: usize) {
        let mut shutdown = self.shutdown.subscribe();
        debug!(queue = %queue, "Consumer {} ready", slot);

        while !*shutdown.borrow() {
            match self.broker.reserve(queue, self.settings.poll_interval).await {
                Ok(Some(reserved)) => self.process(reserved).await,
                Ok(None) => {}
                Err(e) => {
                    error!(queue = %queue, "Failed to reserve job: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        debug!(queue = %queue, "Consumer {} stopped", slot);
    }
}
