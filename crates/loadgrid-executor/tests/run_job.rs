//! End-to-end job execution against local upstream servers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use loadgrid_executor::{run_job, NoopCollector};
use loadgrid_types::{Job, RequestSpec};

/// Serve `router` on an ephemeral loopback port and return its base URL.
async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test upstream");
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn counting_upstream(status: StatusCode) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/{*path}",
            get(
                move |State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (status, "ok")
                },
            ),
        )
        .with_state(Arc::clone(&hits));
    (spawn_upstream(router).await, hits)
}

fn job_with_requests(count: usize, targets: Vec<String>) -> Job {
    Job {
        id: "job-1".to_string(),
        round_id: "round-1".to_string(),
        requests: (0..count)
            .map(|i| RequestSpec {
                path: format!("/resource/{i}"),
                ..RequestSpec::default()
            })
            .collect(),
        target_urls: targets,
        rate_per_sec: count as i64,
        duration_millis: 2_000,
    }
}

#[tokio::test]
async fn spreads_requests_across_targets_and_reports_successes() {
    let (first_url, first_hits) = counting_upstream(StatusCode::OK).await;
    let (second_url, second_hits) = counting_upstream(StatusCode::OK).await;

    let job = job_with_requests(4, vec![first_url, second_url]);
    let client = reqwest::Client::new();
    let report = run_job(&client, &job, &NoopCollector).await;

    assert_eq!(report.job_id, "job-1");
    assert_eq!(report.round_id, "round-1");
    assert_eq!(report.planned_requests, 4);
    assert_eq!(report.completed_requests, 4);
    assert_eq!(report.success_count, 4);
    assert_eq!(report.failure_count, 0);
    assert_eq!(report.timeout_count, 0);
    assert_eq!(report.latency_millis.len(), 4);

    // Round-robin by index: two requests per upstream.
    assert_eq!(first_hits.load(Ordering::SeqCst), 2);
    assert_eq!(second_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn error_statuses_count_as_failures() {
    let (url, _hits) = counting_upstream(StatusCode::NOT_FOUND).await;

    let job = job_with_requests(3, vec![url]);
    let client = reqwest::Client::new();
    let report = run_job(&client, &job, &NoopCollector).await;

    assert_eq!(report.completed_requests, 3);
    assert_eq!(report.success_count, 0);
    assert_eq!(report.failure_count, 3);
    assert_eq!(report.timeout_count, 0);
}

#[tokio::test]
async fn gateway_statuses_count_as_timeouts() {
    let (url, _hits) = counting_upstream(StatusCode::SERVICE_UNAVAILABLE).await;

    let job = job_with_requests(2, vec![url]);
    let client = reqwest::Client::new();
    let report = run_job(&client, &job, &NoopCollector).await;

    assert_eq!(report.completed_requests, 2);
    assert_eq!(report.failure_count, 2);
    assert_eq!(report.timeout_count, 2);
}

#[tokio::test]
async fn empty_target_list_fails_the_whole_job() {
    let job = job_with_requests(5, Vec::new());
    let client = reqwest::Client::new();
    let report = run_job(&client, &job, &NoopCollector).await;

    assert_eq!(report.planned_requests, 5);
    assert_eq!(report.completed_requests, 5);
    assert_eq!(report.failure_count, 5);
    assert_eq!(report.timeout_count, 5);
    assert_eq!(report.success_count, 0);
}

#[tokio::test]
async fn unreachable_target_is_a_fast_failure_not_a_timeout() {
    // Nothing listens on this port.
    let job = job_with_requests(2, vec!["http://127.0.0.1:1".to_string()]);
    let client = reqwest::Client::new();
    let report = run_job(&client, &job, &NoopCollector).await;

    assert_eq!(report.completed_requests, 2);
    assert_eq!(report.failure_count, 2);
    assert_eq!(report.timeout_count, 0);
}

#[tokio::test]
async fn deadline_truncates_the_batch() {
    let router = Router::new().route(
        "/{*path}",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            "slow"
        }),
    );
    let url = spawn_upstream(router).await;

    let mut job = job_with_requests(50, vec![url]);
    job.duration_millis = 150;
    let client = reqwest::Client::new();
    let report = run_job(&client, &job, &NoopCollector).await;

    assert!(report.completed_requests < 50);
    assert_eq!(
        report.latency_millis.len() as i64,
        report.completed_requests
    );
    assert_eq!(
        report.success_count + report.failure_count,
        report.completed_requests
    );
}

#[tokio::test]
async fn request_body_and_method_reach_the_upstream() {
    let seen = Arc::new(tokio::sync::Mutex::new(Vec::<(String, String)>::new()));
    let router = Router::new()
        .route(
            "/echo",
            axum::routing::post(
                move |State(seen): State<Arc<tokio::sync::Mutex<Vec<(String, String)>>>>,
                      body: String| async move {
                    seen.lock().await.push(("POST".to_string(), body));
                    "ok"
                },
            ),
        )
        .with_state(Arc::clone(&seen));
    let url = spawn_upstream(router).await;

    let job = Job {
        id: "job-post".to_string(),
        round_id: "round-1".to_string(),
        requests: vec![RequestSpec {
            method: "POST".to_string(),
            path: "/echo".to_string(),
            body: "{\"sku\":42}".to_string(),
            ..RequestSpec::default()
        }],
        target_urls: vec![url],
        rate_per_sec: 1,
        duration_millis: 2_000,
    };
    let client = reqwest::Client::new();
    let report = run_job(&client, &job, &NoopCollector).await;

    assert_eq!(report.success_count, 1);
    let seen = seen.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], ("POST".to_string(), "{\"sku\":42}".to_string()));
}
