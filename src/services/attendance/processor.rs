use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use super::parser::{decode_text, parse_report};
use super::{AttendanceError, AttendanceUpload};
use crate::config::AttendanceConfig;
use crate::database::models::{from_row, to_row, AttendanceLog, OnboardingRecord, StudentAttendance};
use crate::database::{Collection, Query, RowStore, StoreError};

/// Result of turning one meeting report into attendance rows
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub success: bool,
    pub message: String,
    pub subject: String,
    pub batch: String,
    pub class_date: String,
    pub processed: usize,
    pub present: usize,
    pub absent: usize,
    pub stu_updated: usize,
    pub errors: Vec<String>,
}

/// Turns a meeting attendance export into `attendance_logs` rows and cumulative `stu` totals
pub struct AttendanceProcessor {
    store: Arc<dyn RowStore>,
    present_threshold: f64,
    default_meeting_minutes: f64,
}

impl AttendanceProcessor {
    pub fn new(store: Arc<dyn RowStore>, config: &AttendanceConfig) -> Self {
        Self {
            store,
            present_threshold: config.present_threshold,
            default_meeting_minutes: config.default_meeting_minutes,
        }
    }

    pub async fn process(&self, upload: &AttendanceUpload) -> Result<ProcessReport, AttendanceError> {
        let text = decode_text(&upload.file.bytes);
        let report = parse_report(&text, self.default_meeting_minutes)?;
        let required_minutes = report.meeting_minutes * self.present_threshold;
        info!(
            "Processing {} for {} on {}: {} participants, {:.2} of {:.2} minutes required",
            upload.subject,
            upload.batch(),
            upload.class_date,
            report.participants.len(),
            required_minutes,
            report.meeting_minutes
        );

        let mut errors: Vec<String> = report
            .skipped
            .iter()
            .map(|name| format!("{}: no enrollment id", name))
            .collect();

        let mut next_log_id = self.max_log_id().await? + 1;
        let mut logs = Vec::with_capacity(report.participants.len());
        let mut present_ids = HashSet::new();
        for participant in &report.participants {
            let present = participant.minutes >= required_minutes;
            if present {
                present_ids.insert(participant.enrollment_id.clone());
            }
            let log = AttendanceLog {
                log_id: next_log_id,
                enrollment_id: participant.enrollment_id.clone(),
                cohort_type: upload.cohort_type.clone(),
                cohort_number: upload.cohort_number.clone(),
                subject: upload.subject.clone(),
                class_date: upload.class_date.clone(),
                teacher_name: upload.teacher_name.clone(),
                attendance: present,
            };
            next_log_id += 1;
            logs.push(to_row(&log).map_err(|e| StoreError::QueryError(e.to_string()))?);
        }
        self.store.insert(Collection::AttendanceLogs, logs).await?;

        let stu_updated = self.update_totals(upload, &present_ids, &mut errors).await?;

        let processed = report.participants.len();
        let present = present_ids.len();
        Ok(ProcessReport {
            success: true,
            message: format!(
                "Attendance recorded for {} participants ({} present, {} absent)",
                processed,
                present,
                processed - present
            ),
            subject: upload.subject.clone(),
            batch: upload.batch(),
            class_date: upload.class_date.clone(),
            processed,
            present,
            absent: processed - present,
            stu_updated,
            errors,
        })
    }

    async fn max_log_id(&self) -> Result<i64, AttendanceError> {
        let query = Query::new().order_by("log_id", true).limit(1);
        let rows = self.store.select(Collection::AttendanceLogs, &query).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("log_id"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    /// Count this class for every onboarded student of the cohort
    async fn update_totals(
        &self,
        upload: &AttendanceUpload,
        present_ids: &HashSet<String>,
        errors: &mut Vec<String>,
    ) -> Result<usize, AttendanceError> {
        let students: Vec<OnboardingRecord> = self
            .store
            .list(Collection::Onboarding)
            .await?
            .into_iter()
            .filter_map(|row| from_row::<OnboardingRecord>(row).ok())
            .filter(|s| in_cohort(s, &upload.cohort_type, &upload.cohort_number))
            .collect();
        if students.is_empty() {
            warn!("No onboarded students in {}", upload.batch());
            return Ok(0);
        }

        let ids: Vec<Value> = students
            .iter()
            .map(|s| Value::String(s.enrollment_id.clone()))
            .collect();
        let mut existing: HashMap<String, StudentAttendance> = self
            .store
            .select(Collection::StudentAttendance, &Query::new().is_in("enrollment_id", ids))
            .await?
            .into_iter()
            .filter_map(|row| from_row::<StudentAttendance>(row).ok())
            .map(|s| (s.enrollment_id.clone(), s))
            .collect();

        let now = Utc::now();
        let mut updated = 0;
        for student in &students {
            let mut totals = existing.remove(&student.enrollment_id).unwrap_or_else(|| StudentAttendance {
                enrollment_id: student.enrollment_id.clone(),
                name: student.full_name.clone(),
                cohort_type: Some(upload.cohort_type.clone()),
                cohort_number: Some(upload.cohort_number.clone()),
                total_classes: 0,
                present_classes: 0,
                overall_attendance: 0.0,
                updated_at: None,
            });
            totals.record_class(present_ids.contains(&student.enrollment_id), now);

            let result = match to_row(&totals) {
                Ok(row) => self.store.upsert(Collection::StudentAttendance, row).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match result {
                Ok(_) => updated += 1,
                Err(e) => {
                    warn!("Failed to update totals for {}: {}", student.enrollment_id, e);
                    errors.push(format!("{}: {}", student.enrollment_id, e));
                }
            }
        }
        Ok(updated)
    }
}

fn in_cohort(student: &OnboardingRecord, cohort_type: &str, cohort_number: &str) -> bool {
    let (student_type, student_number) = student.cohort_key();
    student_type.trim().eq_ignore_ascii_case(cohort_type.trim()) && student_number.trim() == cohort_number.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::database::{MemoryStore, Row};
    use crate::services::attendance::CsvFile;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn line(name: &str, duration: &str, roll: &str) -> String {
        let mut columns = vec![""; 13];
        columns[0] = name;
        columns[3] = duration;
        columns[12] = roll;
        columns.join("\t")
    }

    fn upload(csv: String) -> AttendanceUpload {
        AttendanceUpload {
            file: CsvFile {
                file_name: "report.csv".to_string(),
                bytes: csv.into_bytes(),
            },
            cohort_type: "Basic".to_string(),
            cohort_number: "3".to_string(),
            subject: "DSA".to_string(),
            class_date: "2025-03-14".to_string(),
            teacher_name: "Ms. Rao".to_string(),
        }
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(
                Collection::Onboarding,
                vec![
                    row(json!({"EnrollmentID": "25MBY3001", "Full Name": "Asha", "Cohort Type": "Basic", "Cohort Number": 3})),
                    row(json!({"EnrollmentID": "25MBY3002", "Full Name": "Ravi", "Cohort Type": "basic", "Cohort Number": "3"})),
                    row(json!({"EnrollmentID": "25MBY3003", "Full Name": "Meera", "Cohort Type": "Basic", "Cohort Number": "3"})),
                    row(json!({"EnrollmentID": "25MBY4001", "Full Name": "Other", "Cohort Type": "MERN", "Cohort Number": "1"})),
                ],
            )
            .await;
        store
            .seed(
                Collection::StudentAttendance,
                vec![row(json!({
                    "enrollment_id": "25MBY3001",
                    "name": "Asha",
                    "total_classes": 4,
                    "present_classes": 3,
                    "overall_attendance": 75.0
                }))],
            )
            .await;
        store
            .seed(Collection::AttendanceLogs, vec![row(json!({"log_id": 41, "enrollment_id": "25MBY3001"}))])
            .await;
        store
    }

    #[tokio::test]
    async fn records_logs_and_totals() {
        let store = seeded_store().await;
        let processor = AttendanceProcessor::new(store.clone(), &AppConfig::for_tests().attendance);
        let csv = [
            "Meeting duration\t1h 40m".to_string(),
            "Name\tFirst Join\tLast Leave\tIn-Meeting Duration".to_string(),
            line("Asha 25MBY3001", "45m", ""),
            line("Ravi", "5m", "25MBY3002"),
            line("Guest", "1h", ""),
        ]
        .join("\n");

        let report = processor.process(&upload(csv)).await.unwrap();
        assert_eq!((report.processed, report.present, report.absent), (2, 1, 1));
        assert_eq!(report.stu_updated, 3);
        assert_eq!(report.batch, "Basic 3");
        assert_eq!(report.errors, vec!["Guest: no enrollment id".to_string()]);

        let logs = store.rows(Collection::AttendanceLogs).await;
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[1]["log_id"], json!(42));
        assert_eq!(logs[1]["attendance"], json!(true));
        assert_eq!(logs[2]["log_id"], json!(43));
        assert_eq!(logs[2]["attendance"], json!(false));

        let totals: HashMap<String, StudentAttendance> = store
            .rows(Collection::StudentAttendance)
            .await
            .into_iter()
            .map(|r| from_row::<StudentAttendance>(r).unwrap())
            .map(|s| (s.enrollment_id.clone(), s))
            .collect();
        assert_eq!(totals.len(), 3);
        assert_eq!(totals["25MBY3001"].total_classes, 5);
        assert_eq!(totals["25MBY3001"].overall_attendance, 80.0);
        assert_eq!(totals["25MBY3002"].present_classes, 0);
        assert_eq!(totals["25MBY3003"].total_classes, 1);
        assert_eq!(totals["25MBY3003"].name.as_deref(), Some("Meera"));
    }

    #[tokio::test]
    async fn report_without_students_is_rejected() {
        let store = seeded_store().await;
        let processor = AttendanceProcessor::new(store.clone(), &AppConfig::for_tests().attendance);
        let err = processor.process(&upload("just,some,csv".to_string())).await.unwrap_err();
        assert!(matches!(err, AttendanceError::NoParticipantSection));
        assert_eq!(store.rows(Collection::AttendanceLogs).await.len(), 1);
    }
}
