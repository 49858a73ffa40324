use axum::extract::State;
use std::sync::Arc;

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::xp_sync::SyncStatus;
use crate::services::{SyncCoordinator, SyncSummary};
use crate::state::AppState;

fn coordinator(state: &AppState) -> Result<&Arc<SyncCoordinator>, ApiError> {
    state
        .sync
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("XP sync is disabled: XP_API_KEY is not set"))
}

/// GET|POST /api/sync-xp - Refresh every student's XP from the provider
///
/// The run is spawned so it finishes even when the caller disconnects.
pub async fn trigger(State(state): State<AppState>) -> ApiResult<SyncSummary> {
    let coordinator = coordinator(&state)?.clone();
    let summary = tokio::spawn(async move { coordinator.run().await })
        .await
        .map_err(|e| {
            tracing::error!("XP sync task failed: {}", e);
            ApiError::internal_server_error("XP sync task failed")
        })??;
    let message = summary.message.clone();
    Ok(ApiResponse::success(summary).with_message(message))
}

/// GET /api/sync-xp/status - Bookkeeping of the last run
pub async fn status(State(state): State<AppState>) -> ApiResult<SyncStatus> {
    Ok(ApiResponse::success(coordinator(&state)?.status().await))
}
