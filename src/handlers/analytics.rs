use axum::extract::{Query, State};

use crate::middleware::{ApiResponse, ApiResult};
use crate::services::analytics::{CohortSummary, LeaderboardEntry, LeaderboardQuery};
use crate::state::AppState;

/// GET /api/analytics/cohorts - Per-cohort attendance and XP
pub async fn cohorts(State(state): State<AppState>) -> ApiResult<Vec<CohortSummary>> {
    Ok(ApiResponse::success(state.analytics.cohorts().await?))
}

/// GET /api/leaderboard - XP ranking, optionally for one cohort
pub async fn leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<Vec<LeaderboardEntry>> {
    Ok(ApiResponse::success(state.analytics.leaderboard(&query).await?))
}
