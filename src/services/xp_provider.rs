use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::XpConfig;

#[derive(Debug, Error)]
pub enum XpProviderError {
    /// Display text must keep the words "rate limit"; the sync job keys its cooldown on them
    #[error("XP provider rate limit exceeded")]
    RateLimited,

    #[error("XP provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("XP provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed XP provider response: {0}")]
    Malformed(String),

    #[error("XP provider is not configured: {0}")]
    NotConfigured(&'static str),
}

/// What the provider knows about one user
#[derive(Debug, Clone, PartialEq)]
pub enum XpLookup {
    Found(i64),
    /// The provider answered with a status other than "ok"
    NoData { status: String },
}

#[async_trait]
pub trait XpProvider: Send + Sync {
    async fn cumulative_xp(&self, email: &str) -> Result<XpLookup, XpProviderError>;
}

/// Interpret the provider envelope:
/// `[{"output": {"status": "ok", "data": {"cumulativeXpAllTime": 418}}}]`
pub fn parse_envelope(body: &Value) -> Result<XpLookup, XpProviderError> {
    let first = match body {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| XpProviderError::Malformed("empty response array".to_string()))?,
        Value::Object(_) => body,
        other => return Err(XpProviderError::Malformed(format!("unexpected body: {}", other))),
    };

    let output = first
        .get("output")
        .ok_or_else(|| XpProviderError::Malformed("missing 'output'".to_string()))?;

    let status = match output.get("status") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => return Err(XpProviderError::Malformed("missing 'output.status'".to_string())),
    };
    if status != "ok" {
        return Ok(XpLookup::NoData { status });
    }

    let xp = match output.get("data").and_then(|d| d.get("cumulativeXpAllTime")) {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(|f| f.round() as i64)
            .map_err(|_| XpProviderError::Malformed(format!("cumulativeXpAllTime '{}' is not a number", s)))?,
        Some(other) => {
            return Err(XpProviderError::Malformed(format!(
                "cumulativeXpAllTime has unexpected type: {}",
                other
            )))
        }
    };
    Ok(XpLookup::Found(xp))
}

/// Provider client over HTTP: one POST per email, API key in a header
pub struct HttpXpProvider {
    client: reqwest::Client,
    endpoint: url::Url,
    api_key: String,
}

impl HttpXpProvider {
    pub const API_KEY_HEADER: &'static str = "x-api-key";

    pub fn new(config: &XpConfig) -> Result<Self, XpProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or(XpProviderError::NotConfigured("XP_API_KEY"))?;
        let endpoint =
            url::Url::parse(&config.api_url).map_err(|_| XpProviderError::NotConfigured("XP_API_URL"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, endpoint, api_key })
    }
}

#[async_trait]
impl XpProvider for HttpXpProvider {
    async fn cumulative_xp(&self, email: &str) -> Result<XpLookup, XpProviderError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(Self::API_KEY_HEADER, &self.api_key)
            .json(&json!({ "email": email }))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(XpProviderError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(XpProviderError::Http {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| XpProviderError::Malformed(e.to_string()))?;
        debug!(email, %body, "xp provider response");
        parse_envelope(&body)
    }
}
