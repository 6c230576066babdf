//! Liveness endpoint, reachable without credentials

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::warn;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the database does not answer
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub uptime_seconds: i64,
    pub database: bool,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "Health check: database ping failed");
            false
        }
    };

    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" },
        module: "labelsync-server",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: (chrono::Utc::now() - state.startup_time).num_seconds(),
        database,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
