use axum::{Json, Router, extract::State, routing::get};
use tokio::net::TcpListener;
use tracing::info;

use crate::miner::{JobRecord, JobStats, SharedStatus};

pub fn router(status: SharedStatus) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/jobs", get(get_jobs))
        .with_state(status)
}

pub async fn serve(bind_addr: String, status: SharedStatus) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "status server listening");
    axum::serve(listener, router(status)).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

async fn get_stats(State(status): State<SharedStatus>) -> Json<JobStats> {
    let guard = match status.read() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    Json(guard.stats.clone())
}

async fn get_jobs(State(status): State<SharedStatus>) -> Json<Vec<JobRecord>> {
    let guard = match status.read() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    Json(guard.recent.iter().cloned().collect())
}
