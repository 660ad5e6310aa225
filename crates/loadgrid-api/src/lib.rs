//! Orchestrator control-plane HTTP surface.
//!
//! Four JSON-over-POST endpoints drive the executor lifecycle, plus the
//! Prometheus exposition endpoint:
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/connect` | Register an executor (201) |
//! | POST | `/heartbeat` | Refresh an executor's liveness (200/404) |
//! | POST | `/next` | Long-poll for the next job batch (200/204/404/503) |
//! | POST | `/report` | Submit a job report (202/400) |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::watch;

use loadgrid_metrics::OrchestratorMetrics;
use loadgrid_registry::ExecutorRegistry;
use loadgrid_rounds::RoundTracker;

/// Shared state for the control-plane handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<ExecutorRegistry>,
    pub rounds: Arc<RoundTracker>,
    pub metrics: Arc<OrchestratorMetrics>,
    /// Process-wide cancellation; `/next` long-polls resolve to 503 when
    /// this flips.
    pub shutdown: watch::Receiver<bool>,
}

/// Build the orchestrator router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/connect", post(handlers::connect))
        .route("/heartbeat", post(handlers::heartbeat))
        .route("/next", post(handlers::next))
        .route("/report", post(handlers::report))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let (_tx, rx) = watch::channel(false);
        build_router(ApiState {
            registry: Arc::new(ExecutorRegistry::default()),
            rounds: Arc::new(RoundTracker::new()),
            metrics: Arc::new(OrchestratorMetrics::new()),
            shutdown: rx,
        })
    }

    #[tokio::test]
    async fn wrong_method_is_rejected() {
        let resp = test_router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/connect")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let resp = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/connect")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn connect_round_trips_through_the_router() {
        let resp = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/connect")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"id\":\"exec-1\",\"workers\":2}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
}
