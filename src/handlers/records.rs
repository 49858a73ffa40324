use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::database::models::{OnboardingForm, OnboardingRecord};
use crate::database::{Collection, Row};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

fn parse_collection(raw: &str) -> Result<Collection, ApiError> {
    raw.parse::<Collection>().map_err(ApiError::not_found)
}

fn key_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetFieldRequest {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub keys: Vec<Value>,
}

/// GET /api/data/:collection - List every row of a collection
pub async fn list(State(state): State<AppState>, Path(collection): Path<String>) -> ApiResult<Vec<Row>> {
    let collection = parse_collection(&collection)?;
    Ok(ApiResponse::success(state.records.list(collection).await?))
}

/// POST /api/data/:collection - Insert or overwrite one row
pub async fn upsert(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Row> {
    let collection = parse_collection(&collection)?;
    let Value::Object(row) = payload else {
        return Err(ApiError::bad_request("Request body must be a JSON object"));
    };
    Ok(ApiResponse::success(state.records.upsert(collection, row).await?))
}

/// DELETE /api/data/:collection - Delete the rows named in `keys`
pub async fn bulk_delete(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(request): Json<BulkDeleteRequest>,
) -> ApiResult<Value> {
    let collection = parse_collection(&collection)?;
    if request.keys.is_empty() {
        return Err(ApiError::bad_request("No keys given"));
    }
    let keys: Vec<String> = request.keys.iter().map(key_text).collect();
    let deleted = state.records.delete(collection, &keys).await?;
    Ok(ApiResponse::success(json!({ "deleted": deleted, "requested": keys.len() })))
}

/// GET /api/data/:collection/:key - Get a single row by key
pub async fn get(
    State(state): State<AppState>,
    Path((collection, key)): Path<(String, String)>,
) -> ApiResult<Row> {
    let collection = parse_collection(&collection)?;
    Ok(ApiResponse::success(state.records.get(collection, &key).await?))
}

/// PATCH /api/data/:collection/:key - Commit one edited cell
pub async fn set_field(
    State(state): State<AppState>,
    Path((collection, key)): Path<(String, String)>,
    Json(request): Json<SetFieldRequest>,
) -> ApiResult<Value> {
    let collection = parse_collection(&collection)?;
    let outcome = state
        .records
        .set_field(collection, &key, &request.field, request.value)
        .await?;
    Ok(ApiResponse::success(json!({
        "key": key,
        "field": request.field,
        "outcome": outcome,
    })))
}

/// DELETE /api/data/:collection/:key - Delete a single row
pub async fn delete(
    State(state): State<AppState>,
    Path((collection, key)): Path<(String, String)>,
) -> ApiResult<Value> {
    let collection = parse_collection(&collection)?;
    match state.records.delete(collection, std::slice::from_ref(&key)).await? {
        0 => Err(ApiError::not_found(format!("{} record {} not found", collection, key))),
        deleted => Ok(ApiResponse::success(json!({ "deleted": deleted }))),
    }
}

/// POST /api/onboarding - Register a student and assign the next enrollment id
pub async fn create_onboarding(
    State(state): State<AppState>,
    Json(form): Json<OnboardingForm>,
) -> ApiResult<OnboardingRecord> {
    let record = state.records.create_onboarding(form).await?;
    let message = format!("Enrolled as {}", record.enrollment_id);
    Ok(ApiResponse::created(record).with_message(message))
}
