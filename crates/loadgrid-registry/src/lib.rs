//! Executor registry.
//!
//! Tracks the fleet of connected executor processes: their declared worker
//! capacity, last heartbeat, and the work queue the scheduler feeds. A
//! single mutex guards the map; lock holders only touch memory, and queue
//! sends always happen through handles cloned out of the lock.
//!
//! The work queue is a bounded channel of capacity 1 carrying one batch of
//! jobs per round, so at most one undelivered batch is ever outstanding
//! and the scheduler blocks rather than dropping work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, warn};

use loadgrid_types::Job;

/// Heartbeat liveness policy: an executor missing `max_missed` consecutive
/// periods is evicted at the next eligibility scan.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub period: Duration,
    pub max_missed: u32,
}

impl HeartbeatConfig {
    fn failure_window(&self) -> Duration {
        self.period * self.max_missed
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            max_missed: 3,
        }
    }
}

struct ExecutorEntry {
    workers: usize,
    heartbeat_time: Instant,
    work_tx: mpsc::Sender<Vec<Job>>,
    work_rx: WorkQueue,
}

/// Consumer end of an executor's work queue, shared with the `/next`
/// handler. The inner mutex serializes the single consumer.
#[derive(Clone)]
pub struct WorkQueue {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Vec<Job>>>>,
}

impl WorkQueue {
    /// Wait for the next job batch. `None` means the executor was evicted
    /// and the producer side is gone.
    pub async fn next_batch(&self) -> Option<Vec<Job>> {
        self.rx.lock().await.recv().await
    }
}

/// Scheduler-side view of a live executor.
#[derive(Clone)]
pub struct ExecutorHandle {
    pub id: String,
    pub workers: usize,
    work_tx: mpsc::Sender<Vec<Job>>,
}

impl ExecutorHandle {
    /// Deliver a batch of jobs, blocking while the previous batch is still
    /// undelivered. Returns `false` when the executor was evicted while we
    /// waited.
    pub async fn send_batch(&self, jobs: Vec<Job>) -> bool {
        self.work_tx.send(jobs).await.is_ok()
    }
}

/// `/next`-side view of a registered executor.
pub struct ExecutorInfo {
    pub id: String,
    pub workers: usize,
    pub queue: WorkQueue,
}

/// The registry of connected executors.
pub struct ExecutorRegistry {
    config: HeartbeatConfig,
    executors: Mutex<HashMap<String, ExecutorEntry>>,
}

impl ExecutorRegistry {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            executors: Mutex::new(HashMap::new()),
        }
    }

    /// Register an executor. Re-registering a known id is a no-op: the
    /// heartbeat clock is not reset and the existing work queue is kept.
    pub fn add_executor(&self, id: &str, workers: usize) {
        let mut executors = self.executors.lock().unwrap();
        if !executors.contains_key(id) {
            let (work_tx, work_rx) = mpsc::channel(1);
            executors.insert(
                id.to_string(),
                ExecutorEntry {
                    workers,
                    heartbeat_time: Instant::now(),
                    work_tx,
                    work_rx: WorkQueue {
                        rx: Arc::new(tokio::sync::Mutex::new(work_rx)),
                    },
                },
            );
            info!(executor_id = %id, workers, "executor registered");
        }
    }

    /// Refresh an executor's heartbeat. Returns whether the id was known.
    pub fn record_heartbeat(&self, id: &str) -> bool {
        let mut executors = self.executors.lock().unwrap();
        match executors.get_mut(id) {
            Some(entry) => {
                entry.heartbeat_time = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Look up an executor for the `/next` path.
    pub fn get_executor(&self, id: &str) -> Option<ExecutorInfo> {
        let executors = self.executors.lock().unwrap();
        executors.get(id).map(|entry| ExecutorInfo {
            id: id.to_string(),
            workers: entry.workers,
            queue: entry.work_rx.clone(),
        })
    }

    /// Number of currently tracked executors, dead or alive.
    pub fn count_executors(&self) -> usize {
        self.executors.lock().unwrap().len()
    }

    /// Return handles for every live executor and evict the expired ones,
    /// all under one critical section. Eviction drops the entry, which
    /// closes its work queue.
    pub fn eligible_executors(&self) -> Vec<ExecutorHandle> {
        let now = Instant::now();
        let window = self.config.failure_window();
        let mut executors = self.executors.lock().unwrap();

        executors.retain(|id, entry| {
            let alive = now <= entry.heartbeat_time + window;
            if !alive {
                warn!(executor_id = %id, "executor failed to heartbeat in time, removing from registry");
            }
            alive
        });

        executors
            .iter()
            .map(|(id, entry)| ExecutorHandle {
                id: id.clone(),
                workers: entry.workers,
                work_tx: entry.work_tx.clone(),
            })
            .collect()
    }

    /// Drop every tracked executor.
    pub fn reset(&self) {
        self.executors.lock().unwrap().clear();
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new(HeartbeatConfig::default())
    }
}
