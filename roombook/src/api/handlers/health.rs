use std::collections::BTreeMap;

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// "ok" or "unhealthy"
    pub status: String,
    pub checks: BTreeMap<String, String>,
}

fn enabled(on: bool) -> String {
    if on { "enabled" } else { "disabled" }.to_string()
}

/// Liveness plus a database round trip. Integrations are reported but never fail the check.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => true,
        Err(e) => {
            warn!("Health check database query failed: {e}");
            false
        }
    };

    let mut checks = BTreeMap::new();
    checks.insert("database".to_string(), if database_ok { "ok" } else { "unreachable" }.to_string());
    checks.insert("calendar".to_string(), enabled(state.booking.calendar_enabled()));
    checks.insert("email".to_string(), enabled(state.booking.email_enabled()));

    let (status, label) = if database_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            checks,
        }),
    )
}
