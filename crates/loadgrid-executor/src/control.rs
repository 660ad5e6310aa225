//! Executor control loops: job polling, heartbeats and worker slots.
//!
//! Each loop runs as its own task. Fatal conditions are funneled into a
//! shared failure channel; whoever owns the process decides to cancel the
//! shutdown watch, and every loop also honors that watch directly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use reqwest::StatusCode;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use loadgrid_types::{Job, JobReport, WorkerId};

use crate::runner::run_job;
use crate::MetricsCollector;

/// Connection details for the orchestrator this executor serves.
#[derive(Clone)]
pub struct ControlPlane {
    base_url: String,
    worker_id: WorkerId,
}

impl ControlPlane {
    pub fn new(base_url: impl Into<String>, worker_id: WorkerId) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Long-poll `/next` and forward received jobs to the worker channel.
///
/// Terminates (funneling the reason) when the orchestrator drains us
/// (204), shuts down (503), errors, or becomes unreachable.
pub async fn poll_loop(
    client: reqwest::Client,
    control: ControlPlane,
    work_tx: mpsc::Sender<Job>,
    failures: mpsc::Sender<anyhow::Error>,
    mut shutdown: watch::Receiver<bool>,
) {
    let url = control.endpoint("/next");
    loop {
        let response = tokio::select! {
            response = client.post(&url).json(control.worker_id()).send() => response,
            _ = shutdown.changed() => return,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let _ = failures
                    .send(anyhow!("unable to get job from orchestrator: {e}"))
                    .await;
                return;
            }
        };

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::SERVICE_UNAVAILABLE {
            info!(%status, "orchestrator signalled completion");
            let _ = failures.send(anyhow!("status complete")).await;
            return;
        }
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_else(|e| {
                format!("unable to read error message from orchestrator: {e}")
            });
            let _ = failures
                .send(anyhow!(
                    "error response fetching job from orchestrator: {status}- {body}"
                ))
                .await;
            return;
        }

        let jobs: Vec<Job> = match response.json().await {
            Ok(jobs) => jobs,
            Err(e) => {
                let _ = failures
                    .send(anyhow!("unable to decode job batch: {e}"))
                    .await;
                return;
            }
        };
        debug!(batch = jobs.len(), "received job batch");
        for job in jobs {
            if work_tx.send(job).await.is_err() {
                return;
            }
        }
    }
}

/// Publish a heartbeat every `period`. A transport error or non-2xx
/// response is fatal: the executor self-terminates rather than lingering
/// past eviction.
pub async fn heartbeat_loop(
    client: reqwest::Client,
    control: ControlPlane,
    period: Duration,
    failures: mpsc::Sender<anyhow::Error>,
    mut shutdown: watch::Receiver<bool>,
) {
    let url = control.endpoint("/heartbeat");
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = client.post(&url).json(control.worker_id()).send().await;
                match result {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => {
                        let _ = failures
                            .send(anyhow!(
                                "orchestrator rejected heartbeat: {}",
                                response.status()
                            ))
                            .await;
                        return;
                    }
                    Err(e) => {
                        let _ = failures
                            .send(anyhow!("unable to publish heartbeat: {e}"))
                            .await;
                        return;
                    }
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

/// One worker slot: consume jobs from the shared channel, run them, and
/// post the stamped report to `/report`.
pub async fn worker_slot_loop(
    client: reqwest::Client,
    control: ControlPlane,
    work_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    metrics: Arc<dyn MetricsCollector>,
    mut shutdown: watch::Receiver<bool>,
) {
    let report_url = control.endpoint("/report");
    loop {
        let job = tokio::select! {
            job = async { work_rx.lock().await.recv().await } => job,
            _ = shutdown.changed() => return,
        };
        let Some(job) = job else {
            return;
        };

        let mut report = run_job(&client, &job, metrics.as_ref()).await;
        report.executor_id = control.worker_id().id.clone();
        deliver_report(&client, &report_url, &report).await;
    }
}

async fn deliver_report(client: &reqwest::Client, url: &str, report: &JobReport) {
    match client.post(url).json(report).send().await {
        Ok(response) => {
            let status = response.status();
            let accepted = status == StatusCode::OK
                || status == StatusCode::CREATED
                || status == StatusCode::ACCEPTED;
            if !accepted {
                warn!(job_id = %report.job_id, %status, "orchestrator rejected job report");
            }
        }
        Err(e) => {
            warn!(job_id = %report.job_id, error = %e, "unable to deliver job report");
        }
    }
}
