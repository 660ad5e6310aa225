//! Executor mode — runs a worker process against an orchestrator.
//!
//! In this mode the daemon:
//! 1. Claims a fresh executor identity and registers via `/connect`
//! 2. Starts N worker slots over a shared job channel
//! 3. Runs the `/next` long-poller and the heartbeat sender
//! 4. Serves executor metrics on a separate port
//! 5. Unwinds when any control loop funnels a fatal condition

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Args;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use loadgrid_executor::{heartbeat_loop, poll_loop, worker_slot_loop, ControlPlane};
use loadgrid_metrics::ExecutorMetrics;
use loadgrid_types::WorkerId;

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

#[derive(Args, Debug)]
pub struct ExecutorOpts {
    /// The hostname of the orchestrator process.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// The port of the orchestrator process.
    #[arg(long, default_value = "8099")]
    pub port: u16,

    /// The number of worker slots to run.
    #[arg(long, default_value = "1")]
    pub workers: u32,

    /// Port for this executor's metrics endpoint.
    #[arg(long, default_value = "9099")]
    pub metrics_port: u16,
}

pub async fn run(opts: ExecutorOpts) -> anyhow::Result<()> {
    info!("loadgrid daemon starting in executor mode");
    if opts.workers == 0 {
        bail!("--workers must be > 0");
    }

    let worker_id = WorkerId {
        id: uuid::Uuid::new_v4().to_string(),
        workers: opts.workers as i32,
    };
    let base_url = format!("http://{}:{}", opts.host, opts.port);
    let control = ControlPlane::new(base_url.clone(), worker_id.clone());
    let client = reqwest::Client::new();

    connect(&client, &base_url, &worker_id)
        .await
        .with_context(|| format!("unable to connect to orchestrator at {base_url}"))?;
    info!(executor_id = %worker_id.id, workers = opts.workers, %base_url, "connected to orchestrator");

    // ── Shutdown and failure funnel ────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (failure_tx, mut failure_rx) = mpsc::channel::<anyhow::Error>(1);

    // ── Metrics server ─────────────────────────────────────────
    let metrics = Arc::new(ExecutorMetrics::new());
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], opts.metrics_port));
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("unable to bind metrics listener on {metrics_addr}"))?;
    let metrics_router = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(Arc::clone(&metrics));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_router).await {
            warn!(error = %e, "metrics server error");
        }
    });
    info!(%metrics_addr, "executor metrics server started");

    // ── Worker slots ───────────────────────────────────────────
    let (work_tx, work_rx) = mpsc::channel(1);
    let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
    let mut slot_handles = Vec::with_capacity(opts.workers as usize);
    for _ in 0..opts.workers {
        slot_handles.push(tokio::spawn(worker_slot_loop(
            client.clone(),
            control.clone(),
            Arc::clone(&work_rx),
            Arc::clone(&metrics) as Arc<dyn loadgrid_executor::MetricsCollector>,
            shutdown_rx.clone(),
        )));
    }

    // ── Control loops ──────────────────────────────────────────
    let heartbeat_handle = tokio::spawn(heartbeat_loop(
        client.clone(),
        control.clone(),
        HEARTBEAT_PERIOD,
        failure_tx.clone(),
        shutdown_rx.clone(),
    ));
    let poll_handle = tokio::spawn(poll_loop(
        client.clone(),
        control,
        work_tx,
        failure_tx,
        shutdown_rx,
    ));

    // ── Wait for a fatal condition or Ctrl-C ───────────────────
    tokio::select! {
        failure = failure_rx.recv() => {
            if let Some(e) = failure {
                error!(error = %e, "control loop failed, canceling executor process");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
    let _ = shutdown_tx.send(true);

    let _ = heartbeat_handle.await;
    let _ = poll_handle.await;
    for handle in slot_handles {
        let _ = handle.await;
    }

    info!("executor stopped");
    Ok(())
}

/// Register with the orchestrator, retrying transient failures.
async fn connect(
    client: &reqwest::Client,
    base_url: &str,
    worker_id: &WorkerId,
) -> anyhow::Result<()> {
    let url = format!("{base_url}/connect");
    let mut backoff = CONNECT_BACKOFF;
    let mut last_error = None;

    for attempt in 1..=CONNECT_ATTEMPTS {
        match client.post(&url).json(worker_id).send().await {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                // Client errors will not heal themselves; bail out early.
                if status.is_client_error() {
                    bail!("orchestrator rejected connect: {status}- {body}");
                }
                last_error = Some(anyhow::anyhow!("connect failed: {status}- {body}"));
            }
            Err(e) => last_error = Some(e.into()),
        }
        if attempt < CONNECT_ATTEMPTS {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("connect failed")))
}

async fn render_metrics(State(metrics): State<Arc<ExecutorMetrics>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render(),
    )
}
