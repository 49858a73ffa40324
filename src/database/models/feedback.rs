use serde::{Deserialize, Serialize};

use super::{number_or_string, string_or_number};
use crate::database::store::Row;

/// Mentor / overall feedback for one student, keyed like onboarding by `EnrollmentID`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    #[serde(rename = "EnrollmentID")]
    pub enrollment_id: String,
    #[serde(rename = "Mentor Feedback", default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub mentor_feedback: Option<String>,
    #[serde(rename = "Overall Feedback", default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub overall_feedback: Option<String>,
    #[serde(rename = "Mentor Rating", default, deserialize_with = "number_or_string", skip_serializing_if = "Option::is_none")]
    pub mentor_rating: Option<f64>,
    #[serde(rename = "Overall Rating", default, deserialize_with = "number_or_string", skip_serializing_if = "Option::is_none")]
    pub overall_rating: Option<f64>,
    #[serde(flatten)]
    pub extra: Row,
}

impl FeedbackRecord {
    pub const MAX_RATING: f64 = 10.0;

    /// Ratings must be finite and within 0..=MAX_RATING
    pub fn validate(&self) -> Result<(), String> {
        for (field, rating) in [("Mentor Rating", self.mentor_rating), ("Overall Rating", self.overall_rating)] {
            if let Some(value) = rating {
                if !value.is_finite() || !(0.0..=Self::MAX_RATING).contains(&value) {
                    return Err(format!("{} must be between 0 and {}", field, Self::MAX_RATING));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::from_row;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<FeedbackRecord, serde_json::Error> {
        from_row(value.as_object().cloned().unwrap())
    }

    #[test]
    fn ratings_accept_numeric_strings() {
        let record = parse(json!({"EnrollmentID": "25MBY3001", "Mentor Rating": "4.5", "Overall Rating": ""})).unwrap();
        assert_eq!(record.mentor_rating, Some(4.5));
        assert_eq!(record.overall_rating, None);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_ratings() {
        let record = parse(json!({"EnrollmentID": "25MBY3001", "Overall Rating": 11})).unwrap();
        assert!(record.validate().is_err());
        assert!(parse(json!({"EnrollmentID": "25MBY3001", "Mentor Rating": "great"})).is_err());
    }
}
