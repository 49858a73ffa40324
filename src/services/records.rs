use chrono::{Datelike, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::database::models::{from_row, to_row, EnrollmentId, FeedbackRecord, OnboardingForm, OnboardingRecord};
use crate::database::store::{is_valid_column, values_equal};
use crate::database::{Collection, Row, RowStore, StoreError, UpdateAck};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{collection} record {key} not found")]
    NotFound { collection: Collection, key: String },

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Validation failed")]
    Validation(HashMap<String, String>),

    #[error("Enrollment ids for 20{0:02} are exhausted")]
    SequenceExhausted(u8),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which step of `set_field` settled the write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetFieldOutcome {
    /// The store confirmed the update
    Updated,
    /// The store could not confirm, but a re-read shows the new value
    Verified,
    /// The value was still stale after the update and the whole record was rewritten
    Upserted,
}

/// Table-editing operations behind the admin grids
pub struct RecordService {
    store: Arc<dyn RowStore>,
    first_sequence: u16,
}

const CREATE_ATTEMPTS: usize = 3;

impl RecordService {
    pub fn new(store: Arc<dyn RowStore>, first_sequence: u16) -> Self {
        Self { store, first_sequence }
    }

    pub async fn list(&self, collection: Collection) -> Result<Vec<Row>, RecordError> {
        Ok(self.store.list(collection).await?)
    }

    pub async fn get(&self, collection: Collection, key: &str) -> Result<Row, RecordError> {
        self.store
            .get(collection, &collection.key_value(key))
            .await?
            .ok_or_else(|| RecordError::NotFound {
                collection,
                key: key.to_string(),
            })
    }

    /// Commit one edited cell.
    ///
    /// A plain keyed update is tried first. Only when the store cannot vouch
    /// for it (zero rows or no row count at all) is the record re-read; a
    /// still-stale value is then fixed with a read-modify-upsert of the whole row.
    pub async fn set_field(
        &self,
        collection: Collection,
        key: &str,
        field: &str,
        value: Value,
    ) -> Result<SetFieldOutcome, RecordError> {
        if field == collection.key_column() {
            return Err(RecordError::InvalidField(format!(
                "{} is the record key and cannot be edited",
                field
            )));
        }
        if !is_valid_column(field) {
            return Err(RecordError::InvalidField(field.to_string()));
        }

        let key_value = collection.key_value(key);
        let mut patch = Row::new();
        patch.insert(field.to_string(), value.clone());

        match self.store.update(collection, &key_value, patch).await? {
            UpdateAck::Rows(n) if n > 0 => {
                debug!("{}/{}: {} updated", collection, key, field);
                return Ok(SetFieldOutcome::Updated);
            }
            ack => debug!("{}/{}: update not confirmed ({:?}), verifying", collection, key, ack),
        }

        let mut current = self.get(collection, key).await?;
        if current.get(field).is_some_and(|v| values_equal(v, &value)) {
            return Ok(SetFieldOutcome::Verified);
        }

        warn!("{}/{}: {} still stale after update, rewriting record", collection, key, field);
        current.insert(field.to_string(), value);
        self.store.upsert(collection, current).await?;
        Ok(SetFieldOutcome::Upserted)
    }

    /// Insert or overwrite a full row. The key column is mandatory.
    pub async fn upsert(&self, collection: Collection, row: Row) -> Result<Row, RecordError> {
        if collection.key_of(&row).is_none() {
            let mut errors = HashMap::new();
            errors.insert(collection.key_column().to_string(), "This field is required".to_string());
            return Err(RecordError::Validation(errors));
        }
        if collection == Collection::Feedback {
            let feedback: FeedbackRecord = from_row(row.clone()).map_err(|e| single_error("feedback", e.to_string()))?;
            feedback.validate().map_err(|msg| single_error("rating", msg))?;
        }
        Ok(self.store.upsert(collection, row).await?)
    }

    pub async fn delete(&self, collection: Collection, keys: &[String]) -> Result<u64, RecordError> {
        let values: Vec<Value> = keys.iter().map(|k| collection.key_value(k)).collect();
        let removed = self.store.delete(collection, &values).await?;
        info!("Deleted {} of {} requested {} records", removed, keys.len(), collection);
        Ok(removed)
    }

    /// Validate an onboarding form, assign the next enrollment id of the current year and store it
    pub async fn create_onboarding(&self, form: OnboardingForm) -> Result<OnboardingRecord, RecordError> {
        let cohort_type = form.validate().map_err(RecordError::Validation)?;
        let year = Utc::now().year() as u32;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let existing = self.store.list(Collection::Onboarding).await?;
            let ids: Vec<String> = existing
                .iter()
                .filter_map(|r| Collection::Onboarding.key_of(r))
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            let enrollment_id =
                EnrollmentId::next_after(ids.iter().map(String::as_str), year, self.first_sequence)
                    .ok_or(RecordError::SequenceExhausted((year % 100) as u8))?;

            let record = form.clone().into_record(enrollment_id, cohort_type);
            let row = to_row(&record).map_err(|e| single_error("form", e.to_string()))?;

            match self.store.insert(Collection::Onboarding, vec![row]).await {
                Ok(_) => {
                    info!("Created onboarding record {}", record.enrollment_id);
                    return Ok(record);
                }
                // Another submission took the same id; pick the next one
                Err(StoreError::Conflict(msg)) if attempt < CREATE_ATTEMPTS => {
                    warn!("Enrollment id {} taken ({}), retrying", enrollment_id, msg);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn single_error(field: &str, message: String) -> RecordError {
    let mut errors = HashMap::new();
    errors.insert(field.to_string(), message);
    RecordError::Validation(errors)
}
