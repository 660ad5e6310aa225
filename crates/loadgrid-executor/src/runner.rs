//! Job execution.
//!
//! A job is a batch of requests run serially under one deadline,
//! round-robined across the job's target URLs. Outcomes are classified
//! into success / failure / timeout and folded into the job report; the
//! deadline truncates the batch rather than failing it.

use std::time::{Duration, Instant};

use reqwest::{Method, Url};
use tracing::{debug, error};

use loadgrid_types::{Job, JobReport, RequestSpec};

use crate::{ErrorEvent, MetricsCollector, SuccessEvent};

const DEFAULT_JOB_DURATION: Duration = Duration::from_secs(1);
const TRANSPORT_TIMEOUT_FLOOR: Duration = Duration::from_secs(60);
const ERROR_BODY_LIMIT: usize = 3000;

/// Execute one job and build its report.
///
/// The caller stamps the executor id and delivers the report.
pub async fn run_job(
    client: &reqwest::Client,
    job: &Job,
    metrics: &dyn MetricsCollector,
) -> JobReport {
    let planned = job.requested_count() as i64;
    let mut report = JobReport {
        job_id: job.id.clone(),
        round_id: job.round_id.clone(),
        planned_requests: planned,
        latency_millis: Vec::with_capacity(job.requested_count()),
        ..JobReport::default()
    };
    metrics.record_job_picked_up(job.requested_count());

    let mut duration = job.duration();
    if duration.is_zero() {
        duration = DEFAULT_JOB_DURATION;
    }
    if job.target_urls.is_empty() {
        error!(job_id = %job.id, "job has no target URLs");
        report.failure_count = planned;
        report.timeout_count = planned;
        report.completed_requests = planned;
        return report;
    }

    let deadline = Instant::now() + duration;
    for (index, spec) in job.requests.iter().enumerate() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!(job_id = %job.id, completed = report.completed_requests,
                "job deadline reached before the batch finished");
            break;
        }

        let target = &job.target_urls[index % job.target_urls.len()];
        let outcome = execute_request(client, target, spec, remaining, metrics).await;
        report.completed_requests += 1;
        report
            .latency_millis
            .push(outcome.duration.as_millis() as i64);
        if outcome.success {
            report.success_count += 1;
        } else {
            report.failure_count += 1;
        }
        if outcome.timeout {
            report.timeout_count += 1;
        }
    }
    report
}

struct RequestOutcome {
    success: bool,
    timeout: bool,
    duration: Duration,
}

impl RequestOutcome {
    fn failed(duration: Duration) -> Self {
        Self {
            success: false,
            timeout: false,
            duration,
        }
    }
}

async fn execute_request(
    client: &reqwest::Client,
    target: &str,
    spec: &RequestSpec,
    remaining: Duration,
    metrics: &dyn MetricsCollector,
) -> RequestOutcome {
    let url = match build_request_url(target, &spec.path, &spec.query_string) {
        Ok(url) => url,
        Err(message) => {
            metrics.post_failure(ErrorEvent {
                status: 0,
                message,
                duration: Duration::ZERO,
            });
            return RequestOutcome::failed(Duration::ZERO);
        }
    };

    let method = if spec.method.is_empty() {
        Method::GET
    } else {
        match Method::from_bytes(spec.method.as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                metrics.post_failure(ErrorEvent {
                    status: 0,
                    message: format!("invalid method {:?}: {e}", spec.method),
                    duration: Duration::ZERO,
                });
                return RequestOutcome::failed(Duration::ZERO);
            }
        }
    };

    let mut request = client.request(method, url);
    for (name, values) in &spec.headers {
        for value in values {
            request = request.header(name.as_str(), value.as_str());
        }
    }
    if !spec.body.is_empty() {
        request = request.body(spec.body.clone());
    }

    let start = Instant::now();
    let response = match tokio::time::timeout(remaining, request.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            let first_byte = start.elapsed();
            metrics.post_failure(ErrorEvent {
                status: 0,
                message: e.to_string(),
                duration: first_byte,
            });
            return RequestOutcome {
                success: false,
                timeout: transport_error_is_timeout(first_byte),
                duration: first_byte,
            };
        }
        Err(_) => {
            let first_byte = start.elapsed();
            metrics.post_failure(ErrorEvent {
                status: 0,
                message: "request canceled at job deadline".to_string(),
                duration: first_byte,
            });
            return RequestOutcome {
                success: false,
                timeout: transport_error_is_timeout(first_byte),
                duration: first_byte,
            };
        }
    };
    let first_byte = start.elapsed();
    let status = response.status().as_u16();

    if status >= 300 {
        let message = read_error_body(response).await;
        metrics.post_failure(ErrorEvent {
            status,
            message,
            duration: first_byte,
        });
        return RequestOutcome {
            success: false,
            timeout: status_is_timeout(status),
            duration: first_byte,
        };
    }

    // Drain the body to completion so the measured duration covers the
    // whole exchange.
    let budget = remaining.saturating_sub(first_byte);
    match tokio::time::timeout(budget, response.bytes()).await {
        Ok(Ok(body)) => {
            let duration = start.elapsed();
            metrics.post_success(SuccessEvent {
                status,
                response_size: body.len() as u64,
                duration,
                first_byte,
            });
            RequestOutcome {
                success: true,
                timeout: false,
                duration,
            }
        }
        Ok(Err(e)) => {
            let duration = start.elapsed();
            metrics.post_failure(ErrorEvent {
                status,
                message: e.to_string(),
                duration,
            });
            RequestOutcome::failed(duration)
        }
        Err(_) => {
            let duration = start.elapsed();
            metrics.post_failure(ErrorEvent {
                status,
                message: "response body read canceled at job deadline".to_string(),
                duration,
            });
            RequestOutcome::failed(duration)
        }
    }
}

/// Resolve `path` + `query` against an absolute target URL.
fn build_request_url(target: &str, path: &str, query: &str) -> Result<Url, String> {
    let base = Url::parse(target).map_err(|e| format!("invalid target URL {target:?}: {e}"))?;
    if !base.has_host() {
        return Err(format!("target URL must be absolute: {target}"));
    }

    let relative = if path.is_empty() { "/" } else { path };
    // An absolute path replaces the base path outright; joining it would
    // let a leading "//" reinterpret the path as a network reference.
    let mut resolved = if relative.starts_with('/') {
        let mut url = base.clone();
        url.set_path(relative);
        url
    } else {
        base.join(relative)
            .map_err(|e| format!("invalid request path {relative:?}: {e}"))?
    };

    // Collapse accidental double slashes while preserving explicit paths.
    if resolved.path().contains("//") {
        let collapsed = resolved.path().replace("//", "/");
        resolved.set_path(&collapsed);
    }
    if !query.is_empty() {
        resolved.set_query(Some(query));
    }
    Ok(resolved)
}

fn status_is_timeout(status: u16) -> bool {
    status == 503 || status == 504
}

/// Transport errors only count as timeouts when the exchange dragged on
/// past a coarse floor, well beyond any healthy round trip.
fn transport_error_is_timeout(elapsed: Duration) -> bool {
    elapsed >= TRANSPORT_TIMEOUT_FLOOR
}

async fn read_error_body(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(mut text) => {
            text.truncate(ERROR_BODY_LIMIT);
            text
        }
        Err(e) => format!("unable to read error message from response: {e}"),
    }
}
