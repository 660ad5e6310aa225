//! sumsvc — a trivial upstream for local load-test runs.
//!
//! Answers `/sum?a=1&b=2` with the sum as JSON and `/healthz` with "ok".
//! Pair it with the orchestrator's random-sum request source.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "sumsvc", about = "Trivial sum service")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value = "8080")]
    port: u16,
}

#[derive(Serialize)]
struct SumResponse {
    a: i64,
    b: i64,
    sum: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    info!(%addr, "sum service starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router()).await?;
    Ok(())
}

fn router() -> Router {
    Router::new()
        .route("/sum", get(sum))
        .route("/healthz", get(healthz))
}

async fn sum(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let a = match parse_int_param(&params, "a") {
        Ok(value) => value,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };
    let b = match parse_int_param(&params, "b") {
        Ok(value) => value,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };
    Json(SumResponse { a, b, sum: a + b }).into_response()
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn parse_int_param(params: &HashMap<String, String>, key: &str) -> Result<i64, String> {
    let value = params
        .get(key)
        .ok_or_else(|| format!("missing query parameter {key:?}"))?;
    value
        .parse()
        .map_err(|_| format!("invalid integer value for {key:?}: {value}"))
}
