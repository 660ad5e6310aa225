//! Control-plane handlers.
//!
//! Every handler reads/writes through the shared [`ApiState`]. Payload
//! parsing failures map to 400 regardless of whether the body was invalid
//! JSON or the wrong shape.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::{debug, warn};

use loadgrid_types::{JobReport, WorkerId};

use crate::ApiState;

/// POST /connect
pub async fn connect(
    State(state): State<ApiState>,
    body: Result<Json<WorkerId>, JsonRejection>,
) -> impl IntoResponse {
    let worker = match parse_worker(body) {
        Ok(worker) => worker,
        Err(response) => return response,
    };
    // Executors that under-declare their capacity still get one slot.
    let workers = worker.workers.max(1) as usize;
    state.registry.add_executor(&worker.id, workers);
    StatusCode::CREATED.into_response()
}

/// POST /heartbeat
pub async fn heartbeat(
    State(state): State<ApiState>,
    body: Result<Json<WorkerId>, JsonRejection>,
) -> impl IntoResponse {
    let worker = match parse_worker(body) {
        Ok(worker) => worker,
        Err(response) => return response,
    };
    if state.registry.record_heartbeat(&worker.id) {
        StatusCode::OK.into_response()
    } else {
        not_found(&worker.id)
    }
}

/// POST /next
///
/// Blocks on the executor's work queue until a batch arrives. Resolves to
/// 503 when the orchestrator is shutting down, and to 204 when the
/// executor has been evicted and its queue closed.
pub async fn next(
    State(state): State<ApiState>,
    body: Result<Json<WorkerId>, JsonRejection>,
) -> impl IntoResponse {
    let worker = match parse_worker(body) {
        Ok(worker) => worker,
        Err(response) => return response,
    };
    let Some(info) = state.registry.get_executor(&worker.id) else {
        return not_found(&worker.id);
    };

    let mut shutdown = state.shutdown.clone();
    if *shutdown.borrow() {
        return shutting_down();
    }

    debug!(executor_id = %worker.id, "executor polling for its next batch");
    tokio::select! {
        batch = info.queue.next_batch() => match batch {
            Some(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
            // Queue closed: the executor was evicted while it polled.
            None => StatusCode::NO_CONTENT.into_response(),
        },
        _ = shutdown.changed() => shutting_down(),
    }
}

/// POST /report
pub async fn report(
    State(state): State<ApiState>,
    body: Result<Json<JobReport>, JsonRejection>,
) -> impl IntoResponse {
    let report = match body {
        Ok(Json(report)) => report,
        Err(rejection) => {
            warn!(error = %rejection, "unable to parse job report");
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };
    match state.rounds.record_job_report(&report) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

fn parse_worker(
    body: Result<Json<WorkerId>, JsonRejection>,
) -> Result<WorkerId, axum::response::Response> {
    let worker = match body {
        Ok(Json(worker)) => worker,
        Err(rejection) => {
            warn!(error = %rejection, "unable to parse worker identity");
            return Err((StatusCode::BAD_REQUEST, rejection.body_text()).into_response());
        }
    };
    if worker.id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "id is required".to_string()).into_response());
    }
    Ok(worker)
}

fn not_found(executor_id: &str) -> axum::response::Response {
    warn!(%executor_id, "unable to find executor by id");
    (
        StatusCode::NOT_FOUND,
        format!("unable to find executor by id {executor_id}"),
    )
        .into_response()
}

fn shutting_down() -> axum::response::Response {
    (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::to_bytes;
    use tokio::sync::watch;

    use loadgrid_metrics::OrchestratorMetrics;
    use loadgrid_registry::{ExecutorRegistry, HeartbeatConfig};
    use loadgrid_scheduler::ScheduleMetrics;
    use loadgrid_rounds::RoundTracker;
    use loadgrid_types::{Job, RequestSpec};

    fn test_state() -> (ApiState, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            ApiState {
                registry: Arc::new(ExecutorRegistry::default()),
                rounds: Arc::new(RoundTracker::new()),
                metrics: Arc::new(OrchestratorMetrics::new()),
                shutdown: rx,
            },
            tx,
        )
    }

    fn worker(id: &str, workers: i32) -> Result<Json<WorkerId>, JsonRejection> {
        Ok(Json(WorkerId {
            id: id.to_string(),
            workers,
        }))
    }

    #[tokio::test]
    async fn connect_registers_and_returns_created() {
        let (state, _tx) = test_state();
        let resp = connect(State(state.clone()), worker("exec-1", 2))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(state.registry.count_executors(), 1);
    }

    #[tokio::test]
    async fn connect_rejects_empty_id() {
        let (state, _tx) = test_state();
        let resp = connect(State(state.clone()), worker("", 2))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.registry.count_executors(), 0);
    }

    #[tokio::test]
    async fn connect_coerces_non_positive_worker_counts() {
        let (state, _tx) = test_state();
        connect(State(state.clone()), worker("exec-1", 0)).await;
        let info = state.registry.get_executor("exec-1").unwrap();
        assert_eq!(info.workers, 1);
    }

    #[tokio::test]
    async fn reconnect_does_not_replace_the_executor() {
        let (state, _tx) = test_state();
        connect(State(state.clone()), worker("exec-1", 2)).await;

        // Queue a batch, reconnect, and confirm the batch survived.
        let handle = state
            .registry
            .eligible_executors()
            .into_iter()
            .next()
            .unwrap();
        assert!(handle.send_batch(vec![Job::default()]).await);
        let resp = connect(State(state.clone()), worker("exec-1", 8))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let info = state.registry.get_executor("exec-1").unwrap();
        assert_eq!(info.workers, 2);
        assert!(info.queue.next_batch().await.is_some());
    }

    #[tokio::test]
    async fn heartbeat_unknown_executor_is_not_found() {
        let (state, _tx) = test_state();
        let resp = heartbeat(State(state), worker("ghost", 1))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn heartbeat_known_executor_is_ok() {
        let (state, _tx) = test_state();
        connect(State(state.clone()), worker("exec-1", 1)).await;
        let resp = heartbeat(State(state), worker("exec-1", 1))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn next_returns_queued_jobs() {
        let (state, _tx) = test_state();
        connect(State(state.clone()), worker("exec-1", 1)).await;

        let handle = state
            .registry
            .eligible_executors()
            .into_iter()
            .next()
            .unwrap();
        let expected = vec![Job {
            id: "job-1".to_string(),
            round_id: "round-1".to_string(),
            requests: vec![RequestSpec {
                method: "GET".to_string(),
                path: "/a".to_string(),
                ..RequestSpec::default()
            }],
            target_urls: vec!["http://example:8080".to_string()],
            rate_per_sec: 1,
            duration_millis: 1000,
        }];
        assert!(handle.send_batch(expected.clone()).await);

        let resp = next(State(state), worker("exec-1", 1)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let decoded: Vec<Job> = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded, expected);
    }

    #[tokio::test]
    async fn next_unknown_executor_is_not_found() {
        let (state, _tx) = test_state();
        let resp = next(State(state), worker("ghost", 1)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn next_resolves_to_service_unavailable_on_shutdown() {
        let (state, tx) = test_state();
        connect(State(state.clone()), worker("exec-1", 1)).await;

        let pending = tokio::spawn({
            let state = state.clone();
            async move { next(State(state), worker("exec-1", 1)).await.into_response() }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let resp = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn next_after_shutdown_fails_fast() {
        let (state, tx) = test_state();
        connect(State(state.clone()), worker("exec-1", 1)).await;
        tx.send(true).unwrap();

        let resp = next(State(state), worker("exec-1", 1)).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn next_returns_no_content_when_the_executor_was_evicted() {
        let registry = Arc::new(ExecutorRegistry::new(HeartbeatConfig {
            period: Duration::from_millis(5),
            max_missed: 1,
        }));
        let (_tx, rx) = watch::channel(false);
        let state = ApiState {
            registry: Arc::clone(&registry),
            rounds: Arc::new(RoundTracker::new()),
            metrics: Arc::new(OrchestratorMetrics::new()),
            shutdown: rx,
        };

        registry.add_executor("exec-1", 1);
        let pending = tokio::spawn({
            let state = state.clone();
            async move { next(State(state), worker("exec-1", 1)).await.into_response() }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        // The eligibility scan evicts the silent executor and closes its queue.
        assert!(registry.eligible_executors().is_empty());

        let resp = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn report_is_accepted_and_feeds_the_tracker() {
        let (state, _tx) = test_state();
        state.rounds.register_round("round-1", 10, 1, 2);

        let report_body = JobReport {
            job_id: "job-1".to_string(),
            round_id: "round-1".to_string(),
            planned_requests: 2,
            completed_requests: 2,
            success_count: 2,
            latency_millis: vec![10, 20],
            ..JobReport::default()
        };
        let resp = report(State(state.clone()), Ok(Json(report_body.clone())))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        // A duplicate submission is accepted but contributes nothing.
        let resp = report(State(state.clone()), Ok(Json(report_body)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let observations = state.rounds.drain_ready(Duration::from_millis(1));
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].completed_requests, 2);
    }

    #[tokio::test]
    async fn report_without_ids_is_rejected() {
        let (state, _tx) = test_state();
        let resp = report(State(state), Ok(Json(JobReport::default())))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_exposition_text() {
        let (state, _tx) = test_state();
        state.metrics.record_job_dispatched(4);
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/plain"));
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("loadgrid_orchestrator_jobs_dispatched_total 1"));
    }
}
