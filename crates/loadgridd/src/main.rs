//! loadgridd — the loadgrid daemon.
//!
//! Single binary that runs either half of the system:
//!
//! - **orchestrator** — the control plane: rate calculation, job
//!   dispatch, executor registry and the HTTP surface
//! - **executor** — a worker process that connects to an orchestrator,
//!   polls for jobs and issues the actual HTTP requests
//!
//! # Usage
//!
//! ```text
//! loadgridd orchestrator --listen-port 8099 --target-url http://10.0.0.5:8080 \
//!     --load-calculator adaptive-exponential --min-rps 10 --max-rps 500
//! loadgridd executor --host orchestrator.internal --port 8099 --workers 4
//! ```

mod executor_mode;
mod orchestrator_mode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "loadgridd", about = "Distributed HTTP load generation daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator control plane.
    Orchestrator(orchestrator_mode::OrchestratorOpts),

    /// Run an executor that serves an orchestrator.
    Executor(executor_mode::ExecutorOpts),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,loadgridd=debug,loadgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Orchestrator(opts) => orchestrator_mode::run(opts).await,
        Command::Executor(opts) => executor_mode::run(opts).await,
    }
}
