//! Cancellation signal store: per-scan stop flags, scan state and the
//! visited-URL set, all TTL-bounded.

use crate::error::Result;
use crate::model::{ScanEvent, ScanState};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

pub const STOP_TTL: Duration = Duration::from_secs(3600);
pub const STATE_TTL: Duration = Duration::from_secs(86_400);
pub const VISITED_TTL: Duration = Duration::from_secs(86_400);

pub fn stop_key(scan_id: &str) -> String {
    format!("scan:stop:{scan_id}")
}

pub fn state_key(scan_id: &str) -> String {
    format!("scan:state:{scan_id}")
}

pub fn visited_key(scan_id: &str) -> String {
    format!("scan:visited:{scan_id}")
}

/// Any stored flag value stops the scan, `0` and `false` included. Only an
/// empty value is ignored.
pub fn is_truthy(value: &str) -> bool {
    !value.is_empty()
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Post a stop flag for `scan_id` that expires after `ttl`.
    async fn request_stop(&self, scan_id: &str, ttl: Duration) -> Result<()>;

    async fn is_stop_requested(&self, scan_id: &str) -> Result<bool>;

    async fn set_state(&self, scan_id: &str, state: ScanState) -> Result<()>;

    async fn state(&self, scan_id: &str) -> Result<Option<ScanState>>;

    /// Add `url` to the scan's visited set. True when it was not there yet.
    async fn claim_url(&self, scan_id: &str, url: &str) -> Result<bool>;
}

/// Read the scan's state (`Pending` when unknown), apply `event` and store the
/// result.
pub async fn transition(store: &dyn SignalStore, scan_id: &str, event: ScanEvent) -> Result<ScanState> {
    let current = store.state(scan_id).await?.unwrap_or(ScanState::Pending);
    let next = current.apply(event)?;
    if next != current {
        store.set_state(scan_id, next).await?;
        debug!(scan_id = %scan_id, "Scan state {} -> {}", current, next);
    }
    Ok(next)
}

pub struct RedisSignals {
    conn: MultiplexedConnection,
}

impl RedisSignals {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Signal store connected to {}", redis_url);
        Ok(Self { conn })
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SignalStore for RedisSignals {
    async fn request_stop(&self, scan_id: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(stop_key(scan_id))
            .arg("true")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        info!(scan_id = %scan_id, "Stop requested");
        Ok(())
    }

    async fn is_stop_requested(&self, scan_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(stop_key(scan_id))
            .query_async(&mut conn)
            .await?;
        Ok(value.as_deref().is_some_and(is_truthy))
    }

    async fn set_state(&self, scan_id: &str, state: ScanState) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(state_key(scan_id))
            .arg(state.as_str())
            .arg("EX")
            .arg(STATE_TTL.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn state(&self, scan_id: &str) -> Result<Option<ScanState>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(state_key(scan_id))
            .query_async(&mut conn)
            .await?;
        Ok(value.as_deref().and_then(ScanState::from_label))
    }

    async fn claim_url(&self, scan_id: &str, url: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = visited_key(scan_id);
        let added: i64 = redis::cmd("SADD")
            .arg(&key)
            .arg(url)
            .query_async(&mut conn)
            .await?;
        let _: () = redis::cmd("EXPIRE")
            .arg(&key)
            .arg(VISITED_TTL.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(added == 1)
    }
}

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn live(&self) -> Option<&T> {
        (Instant::now() < self.expires_at).then_some(&self.value)
    }
}

#[derive(Default)]
struct MemorySignalsInner {
    flags: HashMap<String, Expiring<String>>,
    states: HashMap<String, Expiring<ScanState>>,
    visited: HashMap<String, Expiring<HashSet<String>>>,
}

/// In-process signal store with the same TTL behavior as the Redis one.
#[derive(Default)]
pub struct MemorySignals {
    inner: Mutex<MemorySignalsInner>,
}

impl MemorySignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw flag value, as an external writer might.
    pub async fn set_raw_flag(&self, scan_id: &str, value: &str, ttl: Duration) {
        self.inner
            .lock()
            .await
            .flags
            .insert(stop_key(scan_id), Expiring::new(value.to_string(), ttl));
    }
}

#[async_trait]
impl SignalStore for MemorySignals {
    async fn request_stop(&self, scan_id: &str, ttl: Duration) -> Result<()> {
        self.set_raw_flag(scan_id, "true", ttl).await;
        info!(scan_id = %scan_id, "Stop requested");
        Ok(())
    }

    async fn is_stop_requested(&self, scan_id: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .flags
            .get(&stop_key(scan_id))
            .and_then(Expiring::live)
            .is_some_and(|v| is_truthy(v)))
    }

    async fn set_state(&self, scan_id: &str, state: ScanState) -> Result<()> {
        self.inner
            .lock()
            .await
            .states
            .insert(state_key(scan_id), Expiring::new(state, STATE_TTL));
        Ok(())
    }

    async fn state(&self, scan_id: &str) -> Result<Option<ScanState>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .states
            .get(&state_key(scan_id))
            .and_then(Expiring::live)
            .copied())
    }

    async fn claim_url(&self, scan_id: &str, url: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let key = visited_key(scan_id);

        let mut urls = match inner.visited.remove(&key) {
            Some(entry) if entry.live().is_some() => entry.value,
            _ => HashSet::new(),
        };
        let added = urls.insert(url.to_string());
        inner.visited.insert(key, Expiring::new(urls, VISITED_TTL));
        Ok(added)
    }
}
