//! Orchestrator mode — runs the control plane.
//!
//! In this mode the daemon:
//! 1. Builds the request source and load calculator from their factories
//! 2. Starts the dispatch loop over the executor registry
//! 3. Runs a metrics poller that refreshes the registry gauge
//! 4. Serves the control-plane API until Ctrl-C, then unwinds the
//!    background tasks within a 10 second budget

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;
use tokio::sync::watch;
use tracing::info;

use loadgrid_api::{build_router, ApiState};
use loadgrid_calc::{
    AdaptiveExponentialCalculator, ExponentialCalculator, LoadCalculator, StepCalculator,
};
use loadgrid_metrics::OrchestratorMetrics;
use loadgrid_registry::{ExecutorRegistry, HeartbeatConfig};
use loadgrid_rounds::RoundTracker;
use loadgrid_scheduler::{Scheduler, SchedulerOptions, StaticTargets};
use loadgrid_sources::{FileSource, RandomSumSource, RequestSource};

const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

#[derive(Args, Debug)]
pub struct OrchestratorOpts {
    /// Orchestrator API and metrics port.
    #[arg(long, default_value = "8099")]
    pub listen_port: u16,

    /// Absolute target URL; repeat for multiple targets.
    #[arg(long = "target-url", required = true)]
    pub target_urls: Vec<String>,

    /// Load calculator: step, exponential, logarithmic or
    /// adaptive-exponential.
    #[arg(long, default_value = "step")]
    pub load_calculator: String,

    /// Minimum requests per second.
    #[arg(long, default_value = "1")]
    pub min_rps: i64,

    /// Maximum requests per second.
    #[arg(long, default_value = "100")]
    pub max_rps: i64,

    /// Step increase for the step load calculator.
    #[arg(long, default_value = "1")]
    pub step_rps: i64,

    /// p99 latency bound for the adaptive calculator; 0 disables it.
    #[arg(long, default_value = "0")]
    pub max_latency_millis: i64,

    /// Request source: file or random-sum.
    #[arg(long, default_value = "random-sum")]
    pub request_source: String,

    /// Path to the request source JSON file.
    #[arg(long)]
    pub request_source_file: Option<String>,

    /// Path to call when using the random-sum request source.
    #[arg(long, default_value = "/sum")]
    pub random_sum_path: String,

    /// Minimum random value used by the random-sum request source.
    #[arg(long, default_value = "1")]
    pub random_sum_min: i64,

    /// Maximum random value used by the random-sum request source.
    #[arg(long, default_value = "100")]
    pub random_sum_max: i64,

    /// How often to dispatch jobs, in seconds.
    #[arg(long, default_value = "1")]
    pub schedule_interval_secs: u64,

    /// Duration of each dispatched job, in seconds.
    #[arg(long, default_value = "1")]
    pub job_duration_secs: u64,

    /// How often to refresh registry gauges, in seconds.
    #[arg(long, default_value = "5")]
    pub metrics_poll_interval_secs: u64,
}

pub fn validate(opts: &OrchestratorOpts) -> anyhow::Result<()> {
    if opts.target_urls.is_empty() {
        bail!("at least one --target-url is required");
    }
    if opts.min_rps < 0 || opts.max_rps < 0 {
        bail!("--min-rps and --max-rps must be >= 0");
    }
    if opts.max_rps < opts.min_rps {
        bail!("--max-rps must be >= --min-rps");
    }
    if opts.schedule_interval_secs == 0 {
        bail!("--schedule-interval-secs must be > 0");
    }
    if opts.job_duration_secs == 0 {
        bail!("--job-duration-secs must be > 0");
    }
    if opts.metrics_poll_interval_secs == 0 {
        bail!("--metrics-poll-interval-secs must be > 0");
    }
    Ok(())
}

pub fn build_request_source(opts: &OrchestratorOpts) -> anyhow::Result<Arc<dyn RequestSource>> {
    match opts.request_source.as_str() {
        "file" => {
            let path = opts
                .request_source_file
                .as_deref()
                .context("--request-source-file is required when --request-source=file")?;
            let source = FileSource::open(path)
                .with_context(|| format!("unable to open request source file {path}"))?;
            Ok(Arc::new(source))
        }
        "random-sum" => {
            let source = RandomSumSource::new(
                &opts.random_sum_path,
                opts.random_sum_min,
                opts.random_sum_max,
            )
            .context("invalid random-sum configuration")?;
            Ok(Arc::new(source))
        }
        other => bail!("unsupported request source {other:?}"),
    }
}

pub fn build_load_calculator(opts: &OrchestratorOpts) -> anyhow::Result<Box<dyn LoadCalculator>> {
    match opts.load_calculator.as_str() {
        "step" => {
            if opts.step_rps <= 0 {
                bail!("--step-rps must be > 0 for the step calculator");
            }
            Ok(Box::new(StepCalculator::new(
                opts.min_rps,
                opts.max_rps,
                opts.step_rps,
            )))
        }
        "exponential" => Ok(Box::new(ExponentialCalculator::new(
            opts.min_rps,
            opts.max_rps,
        ))),
        "logarithmic" => Ok(Box::new(ExponentialCalculator::logarithmic(
            opts.min_rps,
            opts.max_rps,
        ))),
        "adaptive-exponential" => Ok(Box::new(AdaptiveExponentialCalculator::new(
            opts.min_rps,
            opts.max_rps,
            opts.max_latency_millis,
        ))),
        other => bail!("unsupported load calculator {other:?}"),
    }
}

pub async fn run(opts: OrchestratorOpts) -> anyhow::Result<()> {
    info!("loadgrid daemon starting in orchestrator mode");
    validate(&opts)?;

    // ── Shared control-plane state ─────────────────────────────
    let registry = Arc::new(ExecutorRegistry::new(HeartbeatConfig::default()));
    let rounds = Arc::new(RoundTracker::new());
    let metrics = Arc::new(OrchestratorMetrics::new());

    let source = build_request_source(&opts).context("initialize request source")?;
    let calculator = build_load_calculator(&opts).context("initialize load calculator")?;
    let resolver = Arc::new(StaticTargets::new(opts.target_urls.clone()));
    info!(
        calculator = %opts.load_calculator,
        source = %opts.request_source,
        targets = opts.target_urls.len(),
        "control plane initialized"
    );

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&registry),
        Arc::clone(&rounds),
        calculator,
        source,
        resolver,
        Arc::clone(&metrics) as Arc<dyn loadgrid_scheduler::ScheduleMetrics>,
        SchedulerOptions {
            interval: Duration::from_secs(opts.schedule_interval_secs),
            job_duration: Duration::from_secs(opts.job_duration_secs),
        },
    ));

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────
    let scheduler_handle = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        let shutdown = shutdown_rx.clone();
        async move { scheduler.run(shutdown).await }
    });

    // Gauge poller: keeps the executor count fresh between ticks.
    let poller_handle = tokio::spawn({
        let registry = Arc::clone(&registry);
        let metrics = Arc::clone(&metrics);
        let mut shutdown = shutdown_rx.clone();
        let interval = Duration::from_secs(opts.metrics_poll_interval_secs);
        async move {
            use loadgrid_scheduler::ScheduleMetrics;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        metrics.set_registered_executors(registry.count_executors());
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }
    });

    // ── API server ─────────────────────────────────────────────
    let router = build_router(ApiState {
        registry,
        rounds,
        metrics,
        shutdown: shutdown_rx,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], opts.listen_port));
    info!(%addr, "orchestrator API server starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("unable to bind orchestrator listener on {addr}"))?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
    server.await?;

    // Give the background tasks a bounded window to unwind.
    let _ = tokio::time::timeout(SHUTDOWN_BUDGET, async {
        let _ = scheduler_handle.await;
        let _ = poller_handle.await;
    })
    .await;

    info!("orchestrator stopped");
    Ok(())
}
