use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use crate::services::attendance::{AttendanceUpload, UploadForm};
use crate::services::AttendanceError;
use crate::state::AppState;

/// A body over the upload limit surfaces here as a 413 from the multipart reader
fn multipart_error(err: MultipartError) -> AttendanceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AttendanceError::TooLarge(err.body_text())
    } else {
        AttendanceError::Multipart(err.body_text())
    }
}

/// Collect the multipart fields and validate them. Nothing leaves the process before this passes.
pub async fn read_upload(mut multipart: Multipart) -> Result<AttendanceUpload, AttendanceError> {
    let mut form = UploadForm::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        if UploadForm::is_file_field(&name) {
            let file_name = field.file_name().unwrap_or("").to_string();
            let bytes = field.bytes().await.map_err(multipart_error)?;
            form.set_file(file_name, bytes.to_vec());
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            form.set_text(&name, value);
        }
    }
    form.validate()
}

/// POST /api/attendance/upload - Validate and forward a meeting report to the processor
pub async fn upload(State(state): State<AppState>, multipart: Multipart) -> Result<Response, AttendanceError> {
    let upload = read_upload(multipart).await?;
    let (status, body) = state.proxy.forward(&upload).await?;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, Json(body)).into_response())
}

/// POST /process-attendance - Turn a meeting report into attendance rows
pub async fn process(State(state): State<AppState>, multipart: Multipart) -> Result<Response, AttendanceError> {
    let upload = read_upload(multipart).await?;
    let report = state.processor.process(&upload).await?;
    Ok(Json(report).into_response())
}
