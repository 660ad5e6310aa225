//! Adaptive exponential calculator.
//!
//! Ramps the rate exponentially until the target shows distress, then
//! binary-searches the interval between the highest rate that held and the
//! lowest that did not, and finally settles at the best sustainable rate.
//! Between real probes the calculator drops to a minimal recovery rate so
//! the target can drain its queues; a recovery round that itself fails
//! keeps the rate there until the target breathes again.

use crate::{LoadCalculator, LoadObservation};

const DEFAULT_BINARY_GRANULARITY: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ramp,
    Search,
    Steady,
}

/// Feedback-driven calculator: ramp, binary search, steady state.
///
/// An observation counts as failed when at least half of it timed out, or
/// when its p99 latency exceeds `max_latency_millis` (0 disables the
/// latency bound).
pub struct AdaptiveExponentialCalculator {
    min_rps: i64,
    max_rps: i64,
    max_latency_millis: i64,
    recovery_rps: i64,
    binary_granularity: i64,

    phase: Phase,
    awaiting_recovery: bool,
    pending_settle: bool,

    next_rps: i64,
    highest_successful_rps: Option<i64>,
    lowest_unsuccessful_rps: Option<i64>,
}

impl AdaptiveExponentialCalculator {
    pub fn new(min_rps: i64, max_rps: i64, max_latency_millis: i64) -> Self {
        let min_rps = min_rps.max(0);
        let max_rps = max_rps.max(0);
        let min_rps = min_rps.min(max_rps);
        let recovery_rps = 1.min(max_rps);
        Self {
            min_rps,
            max_rps,
            max_latency_millis,
            recovery_rps,
            binary_granularity: DEFAULT_BINARY_GRANULARITY,
            phase: Phase::Ramp,
            awaiting_recovery: false,
            pending_settle: false,
            next_rps: min_rps,
            highest_successful_rps: None,
            lowest_unsuccessful_rps: None,
        }
    }

    fn threshold_exceeded(&self, observation: &LoadObservation) -> bool {
        if observation.timeout_ratio() >= 0.5 {
            return true;
        }
        self.max_latency_millis > 0 && observation.p99_latency_millis > self.max_latency_millis
    }

    fn next_ramp_rps(&self, previous: i64) -> i64 {
        if previous >= self.max_rps {
            return self.max_rps;
        }
        if previous <= 0 {
            if self.max_rps <= 0 {
                return 0;
            }
            return if self.min_rps > 1 { self.min_rps } else { 1 };
        }
        self.clamp_rps((previous * 2).max(self.min_rps))
    }

    fn record_success(&mut self, rps: i64) {
        let rps = self.clamp_rps(rps);
        if self.highest_successful_rps.is_none_or(|h| rps > h) {
            self.highest_successful_rps = Some(rps);
        }
    }

    fn record_failure(&mut self, rps: i64) {
        let rps = self.clamp_rps(rps);
        if self.lowest_unsuccessful_rps.is_none_or(|l| rps < l) {
            self.lowest_unsuccessful_rps = Some(rps);
        }
    }

    fn best_sustainable_rps(&self) -> i64 {
        match self.highest_successful_rps {
            Some(rps) => self.clamp_rps(rps),
            None => self.recovery_rps,
        }
    }

    fn search_converged(&self) -> bool {
        let Some(high) = self.lowest_unsuccessful_rps else {
            return false;
        };
        let low = self.best_sustainable_rps();
        if high <= low || high - low <= self.binary_granularity {
            return true;
        }
        self.next_binary_probe_rps().is_none()
    }

    /// Midpoint of the open search window, rounded down to the granularity
    /// and clamped strictly inside it. `None` when the window is closed.
    fn next_binary_probe_rps(&self) -> Option<i64> {
        let high = self.lowest_unsuccessful_rps?;
        let low = self.best_sustainable_rps();
        if high <= low || high - low <= self.binary_granularity {
            return None;
        }

        let midpoint = (low + high) / 2;
        let mut candidate = round_down_to_multiple(midpoint, self.binary_granularity);
        if candidate <= low {
            candidate = round_up_to_multiple(low + 1, self.binary_granularity);
        }
        if candidate >= high {
            candidate = round_down_to_multiple(high - 1, self.binary_granularity);
        }
        candidate = self.clamp_rps(candidate);
        if candidate <= low || candidate >= high {
            return None;
        }
        Some(candidate)
    }

    fn clamp_rps(&self, rps: i64) -> i64 {
        rps.clamp(0, self.max_rps)
    }
}

impl LoadCalculator for AdaptiveExponentialCalculator {
    fn next(&mut self) -> i64 {
        self.next_rps
    }

    fn wants_observations(&self) -> bool {
        true
    }

    fn observe(&mut self, observation: &LoadObservation) {
        let failed = self.threshold_exceeded(observation);

        if self.awaiting_recovery {
            if failed {
                // The target has not recovered; keep cooling down.
                self.next_rps = self.recovery_rps;
                return;
            }
            self.record_success(observation.total_rps);
            self.awaiting_recovery = false;
            if self.phase == Phase::Search {
                if self.pending_settle {
                    self.pending_settle = false;
                    self.phase = Phase::Steady;
                    self.next_rps = self.best_sustainable_rps();
                    return;
                }
                match self.next_binary_probe_rps() {
                    Some(probe) => self.next_rps = probe,
                    None => {
                        self.phase = Phase::Steady;
                        self.next_rps = self.best_sustainable_rps();
                    }
                }
                return;
            }
            self.next_rps = self.clamp_rps(self.next_rps);
            return;
        }

        match self.phase {
            Phase::Ramp => {
                if failed {
                    self.record_failure(observation.total_rps);
                    self.phase = Phase::Search;
                    self.awaiting_recovery = true;
                    self.next_rps = self.recovery_rps;
                    return;
                }
                self.record_success(observation.total_rps);
                self.next_rps = self.next_ramp_rps(observation.total_rps);
            }
            Phase::Search => {
                if failed {
                    self.record_failure(observation.total_rps);
                } else {
                    self.record_success(observation.total_rps);
                }
                self.pending_settle = self.search_converged();
                self.awaiting_recovery = true;
                self.next_rps = self.recovery_rps;
            }
            Phase::Steady => {
                if failed {
                    self.record_failure(observation.total_rps);
                    self.phase = Phase::Search;
                    self.pending_settle = self.search_converged();
                    self.awaiting_recovery = true;
                    self.next_rps = self.recovery_rps;
                    return;
                }
                self.record_success(observation.total_rps);
                self.next_rps = self.best_sustainable_rps();
            }
        }
    }
}

fn round_down_to_multiple(value: i64, granularity: i64) -> i64 {
    if granularity <= 0 {
        return value;
    }
    value.div_euclid(granularity) * granularity
}

fn round_up_to_multiple(value: i64, granularity: i64) -> i64 {
    if granularity <= 0 {
        return value;
    }
    value.div_euclid(granularity) * granularity
        + if value.rem_euclid(granularity) > 0 {
            granularity
        } else {
            0
        }
}
