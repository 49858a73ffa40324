use axum::{
    extract::{Query, Request, State},
    http::{header::USER_AGENT, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub const CRON_HEADER: &str = "x-vercel-cron";
pub const CRON_USER_AGENT_PREFIX: &str = "vercel-cron";

#[derive(Debug, Default, Deserialize)]
pub struct TriggerQuery {
    pub secret: Option<String>,
}

/// How a sync trigger got past the check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Secret,
    Scheduler,
    /// No secret configured; anyone may trigger
    Open,
}

fn from_scheduler(headers: &HeaderMap) -> bool {
    headers.contains_key(CRON_HEADER)
        || headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ua| ua.starts_with(CRON_USER_AGENT_PREFIX))
}

pub fn authorize_trigger(
    configured: Option<&str>,
    provided: Option<&str>,
    headers: &HeaderMap,
) -> Result<TriggerSource, ApiError> {
    if from_scheduler(headers) {
        return Ok(TriggerSource::Scheduler);
    }
    match configured.filter(|s| !s.is_empty()) {
        None => Ok(TriggerSource::Open),
        Some(secret) if provided == Some(secret) => Ok(TriggerSource::Secret),
        Some(_) => Err(ApiError::unauthorized("Invalid or missing sync secret")),
    }
}

/// Guard for the manual XP sync trigger
pub async fn sync_trigger_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let provided = Query::<TriggerQuery>::try_from_uri(request.uri())
        .map(|Query(q)| q.secret)
        .unwrap_or_default();

    match authorize_trigger(
        state.config.security.sync_secret.as_deref(),
        provided.as_deref(),
        request.headers(),
    ) {
        Ok(TriggerSource::Open) => {
            tracing::warn!("XP_SYNC_SECRET is not set, accepting unauthenticated sync trigger");
            next.run(request).await
        }
        Ok(source) => {
            tracing::debug!("Sync trigger accepted via {:?}", source);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn secret_must_match_when_configured() {
        let headers = HeaderMap::new();
        assert_eq!(authorize_trigger(Some("s3"), Some("s3"), &headers).unwrap(), TriggerSource::Secret);
        assert!(authorize_trigger(Some("s3"), Some("nope"), &headers).is_err());
        assert!(authorize_trigger(Some("s3"), None, &headers).is_err());
    }

    #[test]
    fn open_without_secret() {
        let headers = HeaderMap::new();
        assert_eq!(authorize_trigger(None, None, &headers).unwrap(), TriggerSource::Open);
        assert_eq!(authorize_trigger(Some(""), None, &headers).unwrap(), TriggerSource::Open);
    }

    #[test]
    fn scheduler_headers_are_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(CRON_HEADER, HeaderValue::from_static("1"));
        assert_eq!(authorize_trigger(Some("s3"), None, &headers).unwrap(), TriggerSource::Scheduler);

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("vercel-cron/1.0"));
        assert_eq!(authorize_trigger(Some("s3"), None, &headers).unwrap(), TriggerSource::Scheduler);
    }
}
