use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

use super::{AttendanceError, AttendanceUpload};
use crate::config::AttendanceConfig;

/// Forwards validated uploads to the attendance processor service
pub struct AttendanceProxy {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl AttendanceProxy {
    pub const PROCESS_PATH: &'static str = "process-attendance";

    pub fn new(config: &AttendanceConfig) -> Result<Self, AttendanceError> {
        let base = format!("{}/", config.processor_url.trim_end_matches('/'));
        let endpoint = url::Url::parse(&base)
            .and_then(|base| base.join(Self::PROCESS_PATH))
            .map_err(|e| AttendanceError::Upstream(format!("invalid processor URL '{}': {}", config.processor_url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AttendanceError::Upstream(e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// Send the upload on and hand back the processor's status and JSON body unchanged
    pub async fn forward(&self, upload: &AttendanceUpload) -> Result<(u16, Value), AttendanceError> {
        let part = Part::bytes(upload.file.bytes.clone())
            .file_name(upload.file.file_name.clone())
            .mime_str("text/csv")
            .map_err(|e| AttendanceError::Upstream(e.to_string()))?;
        let form = upload
            .text_fields()
            .into_iter()
            .fold(Form::new().part("csv_file", part), |form, (name, value)| {
                form.text(name, value.to_string())
            });

        info!("Forwarding {} ({} bytes) to {}", upload.file.file_name, upload.file.bytes.len(), self.endpoint);
        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!("Attendance processor request failed: {}", e);
                AttendanceError::Upstream(e.to_string())
            })?;

        let status = response.status().as_u16();
        let body = response.json::<Value>().await.map_err(|e| {
            error!("Attendance processor answered {} with a non-JSON body: {}", status, e);
            AttendanceError::Upstream(format!("processor answered {} with a non-JSON body", status))
        })?;
        Ok((status, body))
    }
}
