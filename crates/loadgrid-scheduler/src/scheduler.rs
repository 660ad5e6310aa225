//! The dispatch loop.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{error, info, warn};

use loadgrid_calc::LoadCalculator;
use loadgrid_registry::ExecutorRegistry;
use loadgrid_rounds::RoundTracker;
use loadgrid_sources::RequestSource;
use loadgrid_types::{Job, RequestSpec};

use crate::traits::{ScheduleMetrics, TargetResolver};

const DEFAULT_SCHEDULE_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_JOB_DURATION: Duration = Duration::from_secs(1);

/// Tick cadence and job length. Zero values fall back to one second.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub interval: Duration,
    pub job_duration: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SCHEDULE_INTERVAL,
            job_duration: DEFAULT_JOB_DURATION,
        }
    }
}

/// Owns one dispatch loop over shared orchestrator state.
pub struct Scheduler {
    registry: Arc<ExecutorRegistry>,
    rounds: Arc<RoundTracker>,
    calculator: Mutex<Box<dyn LoadCalculator>>,
    source: Arc<dyn RequestSource>,
    resolver: Arc<dyn TargetResolver>,
    metrics: Arc<dyn ScheduleMetrics>,
    interval: Duration,
    job_duration: Duration,
}

impl Scheduler {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        rounds: Arc<RoundTracker>,
        calculator: Box<dyn LoadCalculator>,
        source: Arc<dyn RequestSource>,
        resolver: Arc<dyn TargetResolver>,
        metrics: Arc<dyn ScheduleMetrics>,
        opts: SchedulerOptions,
    ) -> Self {
        let interval = if opts.interval.is_zero() {
            DEFAULT_SCHEDULE_INTERVAL
        } else {
            opts.interval
        };
        let job_duration = if opts.job_duration.is_zero() {
            DEFAULT_JOB_DURATION
        } else {
            opts.job_duration
        };
        Self {
            registry,
            rounds,
            calculator: Mutex::new(calculator),
            source,
            resolver,
            metrics,
            interval,
            job_duration,
        }
    }

    /// Run ticks until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_millis = self.interval.as_millis() as u64,
            job_duration_millis = self.job_duration.as_millis() as u64,
            "scheduler started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; swallow it so rounds
        // start one full interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.changed() => {
                    info!("scheduler shutting down, canceling all future work");
                    return;
                }
            }
        }
    }

    /// One dispatch tick. Public so tests and callers can drive rounds
    /// without the timer.
    pub async fn run_once(&self) {
        self.feed_observations();

        let executors = self.registry.eligible_executors();
        self.metrics.set_registered_executors(executors.len());
        if executors.is_empty() {
            return;
        }

        let total_workers: usize = executors.iter().map(|e| e.workers).sum();
        if total_workers == 0 {
            warn!("no registered worker slots are available to receive work");
            return;
        }

        let target_urls = match self.resolver.resolve_targets().await {
            Ok(urls) => urls,
            Err(e) => {
                error!(error = %e, "unable to resolve load test targets");
                return;
            }
        };
        if target_urls.is_empty() {
            warn!("no target URLs available for scheduling");
            return;
        }

        let tick_ns = epoch_nanos();
        let round_id = format!("round-{tick_ns}");
        let total_rps = self.calculator.lock().unwrap().next().max(0);

        let base_rps = total_rps / total_workers as i64;
        let remainder = total_rps % total_workers as i64;
        let mut global_worker_index: i64 = 0;
        let mut expected_reports: i64 = 0;
        let mut planned_requests: i64 = 0;

        for executor in &executors {
            let mut jobs = Vec::with_capacity(executor.workers);
            for slot in 0..executor.workers {
                let mut worker_rps = base_rps;
                if global_worker_index < remainder {
                    worker_rps += 1;
                }
                global_worker_index += 1;

                let request_count =
                    (self.job_duration.as_secs() as i64 * worker_rps).max(0) as usize;
                let requests = self.pull_requests(request_count);

                let job = Job {
                    id: format!("{}-{}-{}", executor.id, tick_ns, slot),
                    round_id: round_id.clone(),
                    requests,
                    target_urls: target_urls.clone(),
                    rate_per_sec: worker_rps,
                    duration_millis: self.job_duration.as_millis() as i64,
                };
                expected_reports += 1;
                planned_requests += job.requested_count() as i64;
                self.metrics.record_job_dispatched(job.requested_count());
                jobs.push(job);
            }

            if !jobs.is_empty() && !executor.send_batch(jobs).await {
                warn!(executor_id = %executor.id, "executor vanished before its batch was delivered");
            }
        }

        self.rounds
            .register_round(&round_id, total_rps, expected_reports, planned_requests);
    }

    fn feed_observations(&self) {
        let mut calculator = self.calculator.lock().unwrap();
        if !calculator.wants_observations() {
            return;
        }
        for observation in self.rounds.drain_ready(2 * self.job_duration) {
            calculator.observe(&observation);
        }
    }

    /// Pull up to `count` requests; a source error truncates the batch.
    fn pull_requests(&self, count: usize) -> Vec<RequestSpec> {
        let mut requests = Vec::with_capacity(count);
        for _ in 0..count {
            match self.source.next() {
                Ok(spec) => requests.push(spec),
                Err(e) => {
                    error!(error = %e, "unable to retrieve request from source");
                    break;
                }
            }
        }
        requests
    }
}

fn epoch_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
