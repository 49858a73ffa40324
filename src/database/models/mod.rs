pub mod attendance;
pub mod feedback;
pub mod onboarding;
pub mod xp;

pub use attendance::{AttendanceLog, StudentAttendance};
pub use feedback::FeedbackRecord;
pub use onboarding::{CohortType, EnrollmentId, OnboardingForm, OnboardingRecord};
pub use xp::XpRecord;

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::database::store::Row;

/// Serialize a model into a store row
pub fn to_row<T: Serialize>(model: &T) -> Result<Row, serde_json::Error> {
    match serde_json::to_value(model)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!("expected an object, got {}", other))),
    }
}

pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(row))
}

/// Text columns that some rows store as numbers (cohort numbers, phone numbers)
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

/// Optional numeric columns that may arrive as strings from form posts
pub(crate) fn number_or_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("'{}' is not a number", s))),
        Some(other) => Err(serde::de::Error::custom(format!("'{}' is not a number", other))),
    }
}

/// Treat an explicit JSON null like a missing column
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
