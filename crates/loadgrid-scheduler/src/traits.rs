//! Seams the scheduler depends on: target resolution and dispatch metrics.

use async_trait::async_trait;

/// Resolves the set of absolute target URLs for the next round.
///
/// Cluster-backed resolvers (pods behind a deployment, service endpoints)
/// implement this; the built-in [`StaticTargets`] serves the fixed-URL
/// mode.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve_targets(&self) -> anyhow::Result<Vec<String>>;
}

/// A fixed list of target URLs.
pub struct StaticTargets {
    urls: Vec<String>,
}

impl StaticTargets {
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }
}

#[async_trait]
impl TargetResolver for StaticTargets {
    async fn resolve_targets(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.urls.clone())
    }
}

/// Gauges and counters the dispatch loop maintains.
pub trait ScheduleMetrics: Send + Sync {
    fn set_registered_executors(&self, count: usize);
    fn record_job_dispatched(&self, request_count: usize);
}
