use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};

use crate::{
    admission::ConnectionRequest,
    directory::{ChannelDirectory, Destination},
    domain::{Contact, MediaRef},
    errors::Error,
    messaging::types::OutboundPayload,
    session::AccountSession,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct BoundsConfig {
    /// Upper bound on any single account operation.
    pub op_timeout: Duration,
    /// Minimum spacing between sends to the same destination.
    pub send_interval: Duration,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(15),
            send_interval: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

async fn bounded<T>(op: &str, limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout {
            op: op.to_string(),
            after: limit,
        }),
    }
}

/// AccountSession decorator that puts a timeout on every account operation
/// and paces sends per destination.
pub struct BoundedSession {
    inner: Arc<dyn AccountSession>,
    cfg: BoundsConfig,
    per_destination: Mutex<HashMap<String, Arc<Mutex<IntervalLimiter>>>>,
}

impl BoundedSession {
    pub fn new(inner: Arc<dyn AccountSession>, cfg: BoundsConfig) -> Self {
        Self {
            inner,
            cfg,
            per_destination: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for(&self, name: &str) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_destination.lock().await;
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(IntervalLimiter::new(self.cfg.send_interval))))
            .clone()
    }
}

#[async_trait]
impl ChannelDirectory for BoundedSession {
    async fn resolve(&self, name: &str) -> Result<Option<Arc<dyn Destination>>> {
        let found = bounded(
            &format!("resolve {name}"),
            self.cfg.op_timeout,
            self.inner.resolve(name),
        )
        .await?;
        let Some(dest) = found else {
            return Ok(None);
        };
        let limiter = self.limiter_for(name).await;
        Ok(Some(Arc::new(BoundedDestination {
            inner: dest,
            op_timeout: self.cfg.op_timeout,
            limiter,
        })))
    }
}

#[async_trait]
impl AccountSession for BoundedSession {
    async fn accept(&self, request: &ConnectionRequest) -> Result<()> {
        bounded(
            "accept connection request",
            self.cfg.op_timeout,
            self.inner.accept(request),
        )
        .await
    }

    async fn read_media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        bounded("read media", self.cfg.op_timeout, self.inner.read_media(media)).await
    }
}

struct BoundedDestination {
    inner: Arc<dyn Destination>,
    op_timeout: Duration,
    limiter: Arc<Mutex<IntervalLimiter>>,
}

#[async_trait]
impl Destination for BoundedDestination {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, payload: &OutboundPayload) -> Result<()> {
        let wait = { self.limiter.lock().await.reserve() };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
        bounded(
            &format!("send to {}", self.inner.name()),
            self.op_timeout,
            self.inner.send(payload),
        )
        .await
    }

    async fn add_member(&self, contact: &Contact) -> Result<()> {
        bounded(
            &format!("add member to {}", self.inner.name()),
            self.op_timeout,
            self.inner.add_member(contact),
        )
        .await
    }
}
