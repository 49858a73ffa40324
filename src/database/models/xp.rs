use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{string_or_number, OnboardingRecord};

/// Cached XP total for one student, keyed by email. Rebuilt from the provider on every sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XpRecord {
    pub email: String,
    pub enrollment_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub full_name: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub cohort_type: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub cohort_number: Option<String>,
    pub xp: i64,
    pub last_updated: DateTime<Utc>,
}

impl XpRecord {
    /// Denormalize the onboarding columns next to the provider's XP value
    pub fn from_onboarding(record: &OnboardingRecord, email: &str, xp: i64, now: DateTime<Utc>) -> Self {
        Self {
            email: email.to_string(),
            enrollment_id: record.enrollment_id.clone(),
            full_name: record.full_name.clone(),
            cohort_type: record.cohort_type.clone(),
            cohort_number: record.cohort_number.clone(),
            xp,
            last_updated: now,
        }
    }
}
