//! Metric registries for both halves of the system, rendered in the
//! Prometheus text exposition format.
//!
//! Counters and gauges are plain atomics; latency distributions use a
//! fixed millisecond bucket ladder. Rendering walks the registry and
//! emits `# HELP` / `# TYPE` declarations followed by sample lines.

mod histogram;

pub use histogram::Histogram;

use std::sync::atomic::{AtomicU64, Ordering};

use loadgrid_scheduler::ScheduleMetrics;

/// Millisecond bucket bounds shared by the latency histograms.
pub const LATENCY_BUCKETS_MS: &[u64] = &[
    10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000,
];

// ── Orchestrator ───────────────────────────────────────────────

/// Counters and gauges maintained by the dispatch loop.
#[derive(Default)]
pub struct OrchestratorMetrics {
    jobs_dispatched: AtomicU64,
    job_requests: AtomicU64,
    registered_executors: AtomicU64,
}

impl OrchestratorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs_dispatched(&self) -> u64 {
        self.jobs_dispatched.load(Ordering::Relaxed)
    }

    pub fn job_requests(&self) -> u64 {
        self.job_requests.load(Ordering::Relaxed)
    }

    pub fn registered_executors(&self) -> u64 {
        self.registered_executors.load(Ordering::Relaxed)
    }

    /// Render the orchestrator registry as Prometheus exposition text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(
            "# HELP loadgrid_orchestrator_jobs_dispatched_total Total number of jobs dispatched by the orchestrator.\n",
        );
        out.push_str("# TYPE loadgrid_orchestrator_jobs_dispatched_total counter\n");
        out.push_str(&format!(
            "loadgrid_orchestrator_jobs_dispatched_total {}\n",
            self.jobs_dispatched()
        ));

        out.push_str(
            "# HELP loadgrid_orchestrator_job_requests_total Total number of requests specified across dispatched jobs.\n",
        );
        out.push_str("# TYPE loadgrid_orchestrator_job_requests_total counter\n");
        out.push_str(&format!(
            "loadgrid_orchestrator_job_requests_total {}\n",
            self.job_requests()
        ));

        out.push_str(
            "# HELP loadgrid_orchestrator_registered_executors Number of executors currently registered.\n",
        );
        out.push_str("# TYPE loadgrid_orchestrator_registered_executors gauge\n");
        out.push_str(&format!(
            "loadgrid_orchestrator_registered_executors {}\n",
            self.registered_executors()
        ));
        out
    }
}

impl ScheduleMetrics for OrchestratorMetrics {
    fn set_registered_executors(&self, count: usize) {
        self.registered_executors
            .store(count as u64, Ordering::Relaxed);
    }

    fn record_job_dispatched(&self, request_count: usize) {
        self.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
        self.job_requests
            .fetch_add(request_count as u64, Ordering::Relaxed);
    }
}

// ── Executor ───────────────────────────────────────────────────

/// Counters and latency distributions maintained by an executor process.
pub struct ExecutorMetrics {
    success_total: AtomicU64,
    failed_total: AtomicU64,
    jobs_picked_up: AtomicU64,
    job_requests: AtomicU64,
    duration_millis: Histogram,
    first_byte_millis: Histogram,
}

impl ExecutorMetrics {
    pub fn new() -> Self {
        Self {
            success_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            jobs_picked_up: AtomicU64::new(0),
            job_requests: AtomicU64::new(0),
            duration_millis: Histogram::new(LATENCY_BUCKETS_MS),
            first_byte_millis: Histogram::new(LATENCY_BUCKETS_MS),
        }
    }

    pub fn record_success(&self, duration_millis: u64, first_byte_millis: u64) {
        self.success_total.fetch_add(1, Ordering::Relaxed);
        self.duration_millis.observe(duration_millis);
        self.first_byte_millis.observe(first_byte_millis);
    }

    pub fn record_failure(&self, duration_millis: u64) {
        self.failed_total.fetch_add(1, Ordering::Relaxed);
        self.duration_millis.observe(duration_millis);
    }

    pub fn record_job_picked_up(&self, request_count: usize) {
        self.jobs_picked_up.fetch_add(1, Ordering::Relaxed);
        self.job_requests
            .fetch_add(request_count as u64, Ordering::Relaxed);
    }

    pub fn success_total(&self) -> u64 {
        self.success_total.load(Ordering::Relaxed)
    }

    pub fn failed_total(&self) -> u64 {
        self.failed_total.load(Ordering::Relaxed)
    }

    pub fn jobs_picked_up(&self) -> u64 {
        self.jobs_picked_up.load(Ordering::Relaxed)
    }

    /// Render the executor registry as Prometheus exposition text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# HELP loadgrid_executor_success_total Number of successful requests served.\n");
        out.push_str("# TYPE loadgrid_executor_success_total counter\n");
        out.push_str(&format!(
            "loadgrid_executor_success_total {}\n",
            self.success_total()
        ));

        out.push_str("# HELP loadgrid_executor_failed_total Number of failed requests.\n");
        out.push_str("# TYPE loadgrid_executor_failed_total counter\n");
        out.push_str(&format!(
            "loadgrid_executor_failed_total {}\n",
            self.failed_total()
        ));

        out.push_str(
            "# HELP loadgrid_executor_jobs_picked_up_total Number of jobs picked up by this executor.\n",
        );
        out.push_str("# TYPE loadgrid_executor_jobs_picked_up_total counter\n");
        out.push_str(&format!(
            "loadgrid_executor_jobs_picked_up_total {}\n",
            self.jobs_picked_up()
        ));

        out.push_str(
            "# HELP loadgrid_executor_job_requests_total Number of requests specified in jobs picked up by this executor.\n",
        );
        out.push_str("# TYPE loadgrid_executor_job_requests_total counter\n");
        out.push_str(&format!(
            "loadgrid_executor_job_requests_total {}\n",
            self.job_requests.load(Ordering::Relaxed)
        ));

        self.duration_millis
            .render_into(&mut out, "loadgrid_executor_request_duration_millis", "Request duration in milliseconds.");
        self.first_byte_millis
            .render_into(&mut out, "loadgrid_executor_first_byte_millis", "Time to first byte in milliseconds.");
        out
    }
}

impl Default for ExecutorMetrics {
    fn default() -> Self {
        Self::new()
    }
}
