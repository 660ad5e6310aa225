//! Executor runtime.
//!
//! An executor process hosts N worker slots fed by a single job channel.
//! A long-poller pulls job batches from the orchestrator's `/next`
//! endpoint, a heartbeat task keeps the registration alive, and each slot
//! runs its jobs under the job deadline and posts a report. Any routine
//! hitting a fatal condition funnels it into a shared failure channel so
//! the process unwinds cooperatively.

mod control;
mod runner;

pub use control::{heartbeat_loop, poll_loop, worker_slot_loop, ControlPlane};
pub use runner::run_job;

use std::time::Duration;

use loadgrid_metrics::ExecutorMetrics;

/// A finished request with its upstream outcome.
pub struct SuccessEvent {
    pub status: u16,
    pub response_size: u64,
    pub duration: Duration,
    pub first_byte: Duration,
}

/// A failed request: transport error, upstream error status, or a body
/// that could not be read.
pub struct ErrorEvent {
    pub status: u16,
    pub message: String,
    pub duration: Duration,
}

/// Sink for per-request and per-job executor telemetry.
pub trait MetricsCollector: Send + Sync {
    fn post_success(&self, event: SuccessEvent);
    fn post_failure(&self, event: ErrorEvent);
    fn record_job_picked_up(&self, request_count: usize);
}

impl MetricsCollector for ExecutorMetrics {
    fn post_success(&self, event: SuccessEvent) {
        self.record_success(
            event.duration.as_millis() as u64,
            event.first_byte.as_millis() as u64,
        );
    }

    fn post_failure(&self, event: ErrorEvent) {
        self.record_failure(event.duration.as_millis() as u64);
    }

    fn record_job_picked_up(&self, request_count: usize) {
        ExecutorMetrics::record_job_picked_up(self, request_count);
    }
}

/// Collector that drops everything.
pub struct NoopCollector;

impl MetricsCollector for NoopCollector {
    fn post_success(&self, _event: SuccessEvent) {}
    fn post_failure(&self, _event: ErrorEvent) {}
    fn record_job_picked_up(&self, _request_count: usize) {}
}
