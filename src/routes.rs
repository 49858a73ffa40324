use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers;
use crate::middleware::sync_trigger_auth;
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.security.cors_origins);
    let max_upload = state.config.server.max_upload_bytes;

    Router::new()
        // Public
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health))
        .merge(data_routes())
        .merge(sync_routes(state.clone()))
        .merge(attendance_routes().layer(DefaultBodyLimit::max(max_upload)))
        .merge(analytics_routes())
        // Global middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", o);
                None
            }
        })
        .collect();
    CorsLayer::permissive().allow_origin(AllowOrigin::list(origins))
}

fn data_routes() -> Router<AppState> {
    use handlers::records;

    Router::new()
        // Collection-level operations
        .route(
            "/api/data/:collection",
            get(records::list)
                .post(records::upsert)
                .delete(records::bulk_delete),
        )
        // Row-level operations
        .route(
            "/api/data/:collection/:key",
            get(records::get)
                .patch(records::set_field)
                .delete(records::delete),
        )
        .route("/api/onboarding", post(records::create_onboarding))
}

fn sync_routes(state: AppState) -> Router<AppState> {
    use handlers::sync;

    Router::new()
        .route("/api/sync-xp", get(sync::trigger).post(sync::trigger))
        .route_layer(from_fn_with_state(state, sync_trigger_auth))
        .route("/api/sync-xp/status", get(sync::status))
}

fn attendance_routes() -> Router<AppState> {
    use handlers::attendance;

    Router::new()
        .route("/api/attendance/upload", post(attendance::upload))
        .route("/process-attendance", post(attendance::process))
}

fn analytics_routes() -> Router<AppState> {
    use handlers::analytics;

    Router::new()
        .route("/api/analytics/cohorts", get(analytics::cohorts))
        .route("/api/leaderboard", get(analytics::leaderboard))
}
