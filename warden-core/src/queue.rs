//! Job broker and dispatcher.
//!
//! Each queue is three Redis lists: `<queue>:waiting`, `<queue>:active` and
//! `<queue>:failed`. Reserving a job moves it atomically from waiting to
//! active, so a worker that dies mid-job leaves it in active where
//! [`JobBroker::requeue_stalled`] can hand it out again. Delivery is
//! at-least-once.

use crate::error::{CoreError, Result};
use crate::model::{CrawlJob, ExploitJob, JobEnvelope, JobHandle, JobReport, QueueName, ScanConfig};
use async_trait::async_trait;
use redis::AsyncConnectionConfig;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const RESULT_TTL: Duration = Duration::from_secs(3600);

pub fn waiting_key(queue: QueueName) -> String {
    format!("{}:waiting", queue.as_str())
}

pub fn active_key(queue: QueueName) -> String {
    format!("{}:active", queue.as_str())
}

pub fn failed_key(queue: QueueName) -> String {
    format!("{}:failed", queue.as_str())
}

pub fn result_key(job_id: &str) -> String {
    format!("job:result:{job_id}")
}

/// A job taken off the waiting list. `token` is the exact stored entry, used
/// to remove it from the active list.
#[derive(Debug, Clone)]
pub struct ReservedJob {
    pub envelope: JobEnvelope,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// Put back on the waiting list; `attempt` is the new attempt count.
    Retried { attempt: u32 },
    /// Out of attempts, moved to the failed list.
    Parked,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub waiting: usize,
    pub active: usize,
    pub failed: usize,
}

#[async_trait]
pub trait JobBroker: Send + Sync {
    async fn push(&self, envelope: &JobEnvelope) -> Result<()>;

    /// Wait up to `timeout` for a job. `None` when the queue stayed empty.
    async fn reserve(&self, queue: QueueName, timeout: Duration) -> Result<Option<ReservedJob>>;

    /// Drop the job from active and store its terminal report.
    async fn complete(&self, job: &ReservedJob, report: &JobReport) -> Result<()>;

    /// Drop the job from active and either retry it or park it.
    async fn fail(&self, job: &ReservedJob, error: &str) -> Result<FailDisposition>;

    /// Move every active job back to waiting. Returns how many moved.
    async fn requeue_stalled(&self, queue: QueueName) -> Result<usize>;

    async fn report(&self, job_id: &str) -> Result<Option<JobReport>>;

    async fn depth(&self, queue: QueueName) -> Result<QueueDepth>;
}

fn decode(raw: String) -> Result<ReservedJob> {
    let envelope: JobEnvelope = serde_json::from_str(&raw)?;
    Ok(ReservedJob { envelope, token: raw })
}

fn next_attempt(job: &ReservedJob) -> Option<JobEnvelope> {
    if !job.envelope.has_attempts_left() {
        return None;
    }
    let mut retry = job.envelope.clone();
    retry.attempts += 1;
    Some(retry)
}

/// Redis list broker. Plain commands share one multiplexed connection.
/// Blocking reserves each hold a connection of their own: a `BRPOPLPUSH`
/// parks its connection server-side, and the client's default response
/// timeout is shorter than the block.
pub struct RedisBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
    blocking: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisBroker {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Broker connected to {}", redis_url);
        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(Vec::new()),
        })
    }

    /// Connection for non-blocking commands, shared with [`crate::signals::RedisSignals`].
    pub fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    async fn blocking_connection(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        let config = AsyncConnectionConfig::new().set_response_timeout(None);
        let conn = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;
        debug!("Opened blocking broker connection");
        Ok(conn)
    }

    async fn store_report(&self, report: &JobReport) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(result_key(&report.job_id))
            .arg(serde_json::to_string(report)?)
            .arg("EX")
            .arg(RESULT_TTL.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove_active(&self, job: &ReservedJob) -> Result<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(active_key(job.envelope.queue))
            .arg(1)
            .arg(&job.token)
            .query_async(&mut conn)
            .await?;
        if removed == 0 {
            warn!(job_id = %job.envelope.id, "Job was no longer in the active list");
        }
        Ok(())
    }
}

#[async_trait]
impl JobBroker for RedisBroker {
    async fn push(&self, envelope: &JobEnvelope) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(waiting_key(envelope.queue))
            .arg(serde_json::to_string(envelope)?)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn reserve(&self, queue: QueueName, timeout: Duration) -> Result<Option<ReservedJob>> {
        let mut conn = self.blocking_connection().await?;
        // BRPOPLPUSH waiting active timeout
        let raw: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(waiting_key(queue))
            .arg(active_key(queue))
            .arg(timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        // A connection that errored is dropped instead of reused
        self.blocking.lock().await.push(conn);

        match raw {
            Some(raw) => {
                let job = decode(raw)?;
                debug!(job_id = %job.envelope.id, queue = %queue, "Reserved job");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, job: &ReservedJob, report: &JobReport) -> Result<()> {
        self.remove_active(job).await?;
        self.store_report(report).await
    }

    async fn fail(&self, job: &ReservedJob, error: &str) -> Result<FailDisposition> {
        self.remove_active(job).await?;
        let mut conn = self.conn.clone();

        if let Some(retry) = next_attempt(job) {
            let _: i64 = redis::cmd("LPUSH")
                .arg(waiting_key(retry.queue))
                .arg(serde_json::to_string(&retry)?)
                .query_async(&mut conn)
                .await?;
            return Ok(FailDisposition::Retried {
                attempt: retry.attempts,
            });
        }

        let _: i64 = redis::cmd("LPUSH")
            .arg(failed_key(job.envelope.queue))
            .arg(&job.token)
            .query_async(&mut conn)
            .await?;
        self.store_report(&JobReport::failed(&job.envelope, error.to_string()))
            .await?;
        Ok(FailDisposition::Parked)
    }

    async fn requeue_stalled(&self, queue: QueueName) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut moved = 0;
        loop {
            let raw: Option<String> = redis::cmd("RPOPLPUSH")
                .arg(active_key(queue))
                .arg(waiting_key(queue))
                .query_async(&mut conn)
                .await?;
            if raw.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            info!(queue = %queue, "Requeued {} stalled jobs", moved);
        }
        Ok(moved)
    }

    async fn report(&self, job_id: &str) -> Result<Option<JobReport>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(result_key(job_id))
            .query_async(&mut conn)
            .await?;
        raw.map(|r| serde_json::from_str(&r).map_err(CoreError::from))
            .transpose()
    }

    async fn depth(&self, queue: QueueName) -> Result<QueueDepth> {
        let mut conn = self.conn.clone();
        let mut lengths = [0usize; 3];
        for (slot, key) in [waiting_key(queue), active_key(queue), failed_key(queue)]
            .into_iter()
            .enumerate()
        {
            lengths[slot] = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
        }
        Ok(QueueDepth {
            waiting: lengths[0],
            active: lengths[1],
            failed: lengths[2],
        })
    }
}

#[derive(Default)]
struct QueueLists {
    waiting: VecDeque<String>,
    active: Vec<String>,
    failed: Vec<String>,
}

#[derive(Default)]
struct MemoryBrokerInner {
    queues: HashMap<QueueName, QueueLists>,
    reports: HashMap<String, JobReport>,
}

/// Broker held in process memory. Same list discipline as [`RedisBroker`];
/// reports do not expire.
pub struct MemoryBroker {
    inner: Mutex<MemoryBrokerInner>,
    /// One wakeup per queue, so a push never wakes a reserve on the other.
    pushed: HashMap<QueueName, Notify>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self {
            inner: Mutex::new(MemoryBrokerInner::default()),
            pushed: QueueName::ALL.into_iter().map(|q| (q, Notify::new())).collect(),
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn wake(&self, queue: QueueName, times: usize) {
        if let Some(notify) = self.pushed.get(&queue) {
            for _ in 0..times {
                notify.notify_one();
            }
        }
    }

    /// Payloads currently waiting on `queue`, oldest first.
    pub async fn waiting(&self, queue: QueueName) -> Vec<JobEnvelope> {
        let inner = self.inner.lock().await;
        inner
            .queues
            .get(&queue)
            .map(|lists| {
                lists
                    .waiting
                    .iter()
                    .rev()
                    .filter_map(|raw| serde_json::from_str(raw).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobBroker for MemoryBroker {
    async fn push(&self, envelope: &JobEnvelope) -> Result<()> {
        let raw = serde_json::to_string(envelope)?;
        self.inner
            .lock()
            .await
            .queues
            .entry(envelope.queue)
            .or_default()
            .waiting
            .push_front(raw);
        self.wake(envelope.queue, 1);
        Ok(())
    }

    async fn reserve(&self, queue: QueueName, timeout: Duration) -> Result<Option<ReservedJob>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                let lists = inner.queues.entry(queue).or_default();
                if let Some(raw) = lists.waiting.pop_back() {
                    lists.active.push(raw.clone());
                    return decode(raw).map(Some);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.pushed.get(&queue) {
                Some(notify) => {
                    let _ = tokio::time::timeout(remaining, notify.notified()).await;
                }
                None => tokio::time::sleep(remaining).await,
            }
        }
    }

    async fn complete(&self, job: &ReservedJob, report: &JobReport) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let lists = inner.queues.entry(job.envelope.queue).or_default();
        if let Some(pos) = lists.active.iter().position(|raw| *raw == job.token) {
            lists.active.remove(pos);
        }
        inner.reports.insert(report.job_id.clone(), report.clone());
        Ok(())
    }

    async fn fail(&self, job: &ReservedJob, error: &str) -> Result<FailDisposition> {
        let retry = next_attempt(job);
        let retry_raw = retry.as_ref().map(serde_json::to_string).transpose()?;

        let mut inner = self.inner.lock().await;
        let lists = inner.queues.entry(job.envelope.queue).or_default();
        if let Some(pos) = lists.active.iter().position(|raw| *raw == job.token) {
            lists.active.remove(pos);
        }

        match (retry, retry_raw) {
            (Some(retry), Some(raw)) => {
                lists.waiting.push_front(raw);
                drop(inner);
                self.wake(job.envelope.queue, 1);
                Ok(FailDisposition::Retried {
                    attempt: retry.attempts,
                })
            }
            _ => {
                lists.failed.push(job.token.clone());
                inner.reports.insert(
                    job.envelope.id.clone(),
                    JobReport::failed(&job.envelope, error.to_string()),
                );
                Ok(FailDisposition::Parked)
            }
        }
    }

    async fn requeue_stalled(&self, queue: QueueName) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let lists = inner.queues.entry(queue).or_default();
        let moved = lists.active.len();
        for raw in lists.active.drain(..) {
            lists.waiting.push_back(raw);
        }
        drop(inner);
        self.wake(queue, moved);
        Ok(moved)
    }

    async fn report(&self, job_id: &str) -> Result<Option<JobReport>> {
        Ok(self.inner.lock().await.reports.get(job_id).cloned())
    }

    async fn depth(&self, queue: QueueName) -> Result<QueueDepth> {
        let inner = self.inner.lock().await;
        Ok(inner
            .queues
            .get(&queue)
            .map(|lists| QueueDepth {
                waiting: lists.waiting.len(),
                active: lists.active.len(),
                failed: lists.failed.len(),
            })
            .unwrap_or_default())
    }
}

/// Accepts crawl and exploit work and hands it to the broker. Returns as soon
/// as the broker has the job; completion is observed elsewhere.
#[derive(Clone)]
pub struct Dispatcher {
    broker: Arc<dyn JobBroker>,
    max_attempts: u32,
}

impl Dispatcher {
    pub fn new(broker: Arc<dyn JobBroker>) -> Self {
        Self {
            broker,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Enqueue any serializable payload. The only check is that it names a
    /// scan.
    pub async fn enqueue<T: Serialize + Sync>(&self, queue: QueueName, job_name: &str, payload: &T) -> Result<JobHandle> {
        let payload = serde_json::to_value(payload)?;
        let has_scan_id = payload
            .get("scanId")
            .and_then(|v| v.as_str())
            .is_some_and(|id| !id.trim().is_empty());
        if !has_scan_id {
            return Err(CoreError::InvalidJob(format!(
                "{job_name} payload has no scanId"
            )));
        }

        let envelope = JobEnvelope::new(queue, job_name, payload, self.max_attempts);
        self.broker.push(&envelope).await?;
        debug!(job_id = %envelope.id, queue = %queue, "Enqueued {}", job_name);

        Ok(JobHandle {
            id: envelope.id,
            queue,
        })
    }

    pub async fn enqueue_crawl(&self, config: &ScanConfig, scan_id: &str) -> Result<JobHandle> {
        self.enqueue_crawl_job(&CrawlJob::new(scan_id, config.clone()))
            .await
    }

    pub async fn enqueue_crawl_job(&self, job: &CrawlJob) -> Result<JobHandle> {
        let queue = QueueName::Crawler;
        self.enqueue(queue, queue.job_name(), job).await
    }

    pub async fn enqueue_exploit(&self, url: &str, payload: &str, attack_type: &str, scan_id: &str) -> Result<JobHandle> {
        let job = ExploitJob {
            scan_id: scan_id.to_string(),
            url: url.to_string(),
            payload: payload.to_string(),
            attack_type: attack_type.to_string(),
        };
        let queue = QueueName::Exploit;
        self.enqueue(queue, queue.job_name(), &job).await
    }

    pub fn broker(&self) -> &Arc<dyn JobBroker> {
        &self.broker
    }
}
