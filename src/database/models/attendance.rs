use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{null_as_default, string_or_number};

/// One student's presence at one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceLog {
    pub log_id: i64,
    pub enrollment_id: String,
    pub cohort_type: String,
    pub cohort_number: String,
    pub subject: String,
    pub class_date: String,
    pub teacher_name: String,
    pub attendance: bool,
}

/// Running attendance totals per student (`stu` collection)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAttendance {
    pub enrollment_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub cohort_type: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub cohort_number: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_classes: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub present_classes: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub overall_attendance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StudentAttendance {
    /// Percentage of classes attended, rounded to two decimals
    pub fn percentage(present: i64, total: i64) -> f64 {
        if total <= 0 {
            return 0.0;
        }
        round2(present as f64 / total as f64 * 100.0)
    }

    /// Count one more class, attended or not
    pub fn record_class(&mut self, present: bool, now: DateTime<Utc>) {
        self.total_classes += 1;
        if present {
            self.present_classes += 1;
        }
        self.overall_attendance = Self::percentage(self.present_classes, self.total_classes);
        self.updated_at = Some(now);
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
