//! Round report aggregation.
//!
//! Every dispatch round is registered here with its expected report count
//! and planned request total. Executors post one report per job; the
//! tracker combines them per round, suppresses duplicates, and hands
//! finished rounds to the scheduler as [`LoadObservation`]s in
//! registration order. A round that goes silent past its deadline is
//! synthesized as a full timeout so the feedback calculator backs off.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use loadgrid_calc::LoadObservation;
use loadgrid_types::JobReport;

const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2);

/// Errors raised when a job report cannot be recorded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("roundId is required")]
    MissingRoundId,
    #[error("jobId is required")]
    MissingJobId,
}

struct RoundAggregate {
    round_id: String,
    total_rps: i64,
    planned_requests: i64,
    has_round_plan: bool,
    expected_reports: i64,
    received_reports: i64,

    success_count: i64,
    failure_count: i64,
    timeout_count: i64,
    completed_requests: i64,
    latency_millis: Vec<i64>,

    received_job_ids: HashSet<String>,
    created_at: Instant,
}

impl RoundAggregate {
    fn new(round_id: &str) -> Self {
        Self {
            round_id: round_id.to_string(),
            total_rps: 0,
            planned_requests: 0,
            has_round_plan: false,
            expected_reports: 0,
            received_reports: 0,
            success_count: 0,
            failure_count: 0,
            timeout_count: 0,
            completed_requests: 0,
            latency_millis: Vec::new(),
            received_job_ids: HashSet::new(),
            created_at: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.expected_reports > 0 && self.received_reports >= self.expected_reports
    }
}

struct TrackerState {
    rounds: HashMap<String, RoundAggregate>,
    order: VecDeque<String>,
}

/// Mutex-guarded aggregate of all in-flight rounds.
///
/// All operations are short map/vector updates; nothing blocks on I/O
/// while the lock is held.
pub struct RoundTracker {
    state: Mutex<TrackerState>,
}

impl RoundTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                rounds: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Register a round's plan. Creates the aggregate if the first report
    /// beat us to it; otherwise updates the rate, raises the expected
    /// report count monotonically, and sets the authoritative planned
    /// request total. A negative `planned_requests` means unknown.
    pub fn register_round(
        &self,
        round_id: &str,
        total_rps: i64,
        expected_reports: i64,
        planned_requests: i64,
    ) {
        if round_id.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if !state.rounds.contains_key(round_id) {
            let mut aggregate = RoundAggregate::new(round_id);
            aggregate.expected_reports = expected_reports;
            state.rounds.insert(round_id.to_string(), aggregate);
            state.order.push_back(round_id.to_string());
        }
        let aggregate = state.rounds.get_mut(round_id).unwrap();
        aggregate.total_rps = total_rps;
        if expected_reports > aggregate.expected_reports {
            aggregate.expected_reports = expected_reports;
        }
        if planned_requests >= 0 {
            aggregate.planned_requests = planned_requests;
            aggregate.has_round_plan = true;
        }
    }

    /// Fold one job report into its round.
    ///
    /// Creates the round (without a plan) when the report arrives before
    /// registration. Reports repeating an already-seen job id are ignored.
    pub fn record_job_report(&self, report: &JobReport) -> Result<(), ReportError> {
        if report.round_id.is_empty() {
            return Err(ReportError::MissingRoundId);
        }
        if report.job_id.is_empty() {
            return Err(ReportError::MissingJobId);
        }
        let mut state = self.state.lock().unwrap();
        if !state.rounds.contains_key(&report.round_id) {
            state
                .rounds
                .insert(report.round_id.clone(), RoundAggregate::new(&report.round_id));
            state.order.push_back(report.round_id.clone());
        }
        let aggregate = state.rounds.get_mut(&report.round_id).unwrap();

        if !aggregate.received_job_ids.insert(report.job_id.clone()) {
            return Ok(());
        }

        aggregate.received_reports += 1;
        aggregate.success_count += report.success_count;
        aggregate.failure_count += report.failure_count;
        aggregate.timeout_count += report.timeout_count;
        aggregate.completed_requests += report.completed_requests;
        if !aggregate.has_round_plan {
            aggregate.planned_requests += report.planned_requests.max(0);
        }
        aggregate
            .latency_millis
            .extend_from_slice(&report.latency_millis);
        Ok(())
    }

    /// Remove and return observations for every leading round that is
    /// either complete or older than `stale_after` (coerced to 2 s when
    /// non-positive). Stops at the first round that is neither, so
    /// observations are always emitted oldest first and at most once.
    pub fn drain_ready(&self, stale_after: Duration) -> Vec<LoadObservation> {
        let stale_after = if stale_after.is_zero() {
            DEFAULT_STALE_AFTER
        } else {
            stale_after
        };

        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let mut observations = Vec::new();
        while let Some(round_id) = state.order.front().cloned() {
            let Some(aggregate) = state.rounds.get(&round_id) else {
                state.order.pop_front();
                continue;
            };

            let stale = now.duration_since(aggregate.created_at) >= stale_after;
            if !aggregate.is_complete() && !stale {
                break;
            }

            let aggregate = state.rounds.remove(&round_id).unwrap();
            state.order.pop_front();
            observations.push(observation_from(aggregate));
        }
        observations
    }

    /// Number of rounds still being tracked.
    pub fn pending_rounds(&self) -> usize {
        self.state.lock().unwrap().rounds.len()
    }

    /// Drop all tracked rounds.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.rounds.clear();
        state.order.clear();
    }
}

impl Default for RoundTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn observation_from(aggregate: RoundAggregate) -> LoadObservation {
    let mut latencies = aggregate.latency_millis;
    latencies.sort_unstable();

    let mut completed = aggregate.completed_requests;
    let mut success = aggregate.success_count;
    let mut failures = aggregate.failure_count;
    let mut timeouts = aggregate.timeout_count;
    if aggregate.received_reports == 0 && aggregate.planned_requests > 0 {
        // A planned round with zero reports is treated as a complete
        // timeout failure.
        warn!(round_id = %aggregate.round_id, planned = aggregate.planned_requests,
            "round produced no reports before going stale");
        completed = aggregate.planned_requests;
        success = 0;
        failures = aggregate.planned_requests;
        timeouts = aggregate.planned_requests;
    }

    LoadObservation {
        round_id: aggregate.round_id,
        total_rps: aggregate.total_rps,
        planned_requests: aggregate.planned_requests,
        completed_requests: completed,
        success_count: success,
        failure_count: failures,
        timeout_count: timeouts,
        p99_latency_millis: p99_latency(&latencies),
    }
}

/// Ranked p99: index `ceil(0.99 n)` into the sorted samples, clamped to
/// `[1, n]`. Zero when there are no samples.
fn p99_latency(sorted_latencies: &[i64]) -> i64 {
    if sorted_latencies.is_empty() {
        return 0;
    }
    let index = (sorted_latencies.len() * 99 + 99) / 100;
    let index = index.clamp(1, sorted_latencies.len());
    sorted_latencies[index - 1]
}
