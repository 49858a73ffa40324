use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET / - Service info and route overview
pub async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "MentiBY Admin API",
            "version": version,
            "description": "Bootcamp admin backend: XP sync, attendance ingestion, table editing",
            "endpoints": {
                "health": "/health",
                "data": "/api/data/:collection[/:key]",
                "onboarding": "/api/onboarding",
                "sync": "/api/sync-xp, /api/sync-xp/status",
                "attendance": "/api/attendance/upload, /process-attendance",
                "analytics": "/api/analytics/cohorts, /api/leaderboard",
            }
        }
    }))
}

/// GET /health - Store connectivity
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let backend = state.store.backend();

    match state.store.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "store": backend,
                    "xp_sync": state.sync.is_some(),
                }
            })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                        "store": backend,
                    }
                })),
            )
        }
    }
}
