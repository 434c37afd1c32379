//! Rate-limited approval service decorator.
//!
//! The approval service is polled for every waiting ticket on every
//! coordinator tick; this wrapper keeps the request rate inside the
//! upstream quota and caches log queries, which are immutable once the
//! approval flow finishes and near-static while it runs.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use moka::future::Cache;
use tracing::debug;

use crate::external::{
    ApprovalLogEntry, ApprovalService, ApprovalSnapshot, ExternalError,
};

/// Decorator adding a governor quota and a moka TTL cache for log
/// queries in front of any [`ApprovalService`].
pub struct RateLimitedApproval {
    inner: Arc<dyn ApprovalService>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    log_cache: Cache<String, Vec<ApprovalLogEntry>>,
}

impl RateLimitedApproval {
    pub fn new(
        inner: Arc<dyn ApprovalService>,
        requests_per_second: u32,
        burst_capacity: u32,
        log_cache_ttl: Duration,
    ) -> Self {
        let per_second = NonZeroU32::new(requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst_capacity.max(1)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        let log_cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(log_cache_ttl)
            .build();

        Self {
            inner,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            log_cache,
        }
    }

    async fn throttle(&self) {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;
    }
}

#[async_trait]
impl ApprovalService for RateLimitedApproval {
    async fn create_ticket(&self, payload: &serde_json::Value) -> Result<String, ExternalError> {
        self.throttle().await;
        self.inner.create_ticket(payload).await
    }

    async fn approval_result(&self, serial: &str) -> Result<ApprovalSnapshot, ExternalError> {
        self.throttle().await;
        self.inner.approval_result(serial).await
    }

    async fn ticket_logs(&self, serial: &str) -> Result<Vec<ApprovalLogEntry>, ExternalError> {
        if let Some(cached) = self.log_cache.get(serial).await {
            debug!(serial, "approval log cache hit");
            return Ok(cached);
        }

        self.throttle().await;
        let logs = self.inner.ticket_logs(serial).await?;
        self.log_cache.insert(serial.to_string(), logs.clone()).await;
        Ok(logs)
    }

    async fn withdraw(&self, serial: &str, operator: &str) -> Result<(), ExternalError> {
        self.throttle().await;
        // Logs change after a withdrawal; drop the stale entry
        self.log_cache.invalidate(serial).await;
        self.inner.withdraw(serial, operator).await
    }
}
