pub mod parser;
pub mod processor;
pub mod proxy;

pub use parser::{decode_text, parse_duration, parse_report, MeetingReport, Participant};
pub use processor::{AttendanceProcessor, ProcessReport};
pub use proxy::AttendanceProxy;

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

use crate::database::StoreError;

static CLASS_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("class date pattern"));

/// Text fields every upload must carry, in the order they are reported back
pub const REQUIRED_FIELDS: [&str; 5] = ["cohort_type", "cohort_number", "subject", "class_date", "teacher_name"];

#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("No CSV file uploaded")]
    MissingFile,

    #[error("Uploaded file must be a .csv file")]
    NotCsv,

    #[error("Missing required fields")]
    MissingFields(Vec<&'static str>),

    #[error("Invalid class date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Invalid multipart upload: {0}")]
    Multipart(String),

    #[error("File too large")]
    TooLarge(String),

    #[error("No participant section found in the attendance report")]
    NoParticipantSection,

    #[error("No participants with an enrollment id found in the attendance report")]
    NoParticipants,

    #[error("Attendance processor unavailable: {0}")]
    Upstream(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Syntactic `YYYY-MM-DD` with month 01-12 and day 01-31. No calendar check.
pub fn is_valid_class_date(raw: &str) -> bool {
    let Some(caps) = CLASS_DATE.captures(raw) else {
        return false;
    };
    let month: u32 = caps[2].parse().unwrap_or(0);
    let day: u32 = caps[3].parse().unwrap_or(0);
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

#[derive(Debug, Clone)]
pub struct CsvFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Multipart fields as they arrive, before validation
#[derive(Debug, Default)]
pub struct UploadForm {
    file: Option<CsvFile>,
    fields: HashMap<&'static str, String>,
}

impl UploadForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a text field; unknown names are ignored
    pub fn set_text(&mut self, name: &str, value: String) {
        let canonical = match name {
            "date" => "class_date",
            other => match REQUIRED_FIELDS.iter().find(|f| **f == other) {
                Some(field) => *field,
                None => return,
            },
        };
        self.fields.insert(canonical, value);
    }

    pub fn set_file(&mut self, file_name: String, bytes: Vec<u8>) {
        self.file = Some(CsvFile { file_name, bytes });
    }

    /// Whether a multipart field name carries the report file
    pub fn is_file_field(name: &str) -> bool {
        matches!(name, "csv_file" | "file")
    }

    pub fn validate(mut self) -> Result<AttendanceUpload, AttendanceError> {
        let file = self.file.take().ok_or(AttendanceError::MissingFile)?;
        if !file.file_name.to_lowercase().ends_with(".csv") {
            return Err(AttendanceError::NotCsv);
        }

        let missing: Vec<&'static str> = REQUIRED_FIELDS
            .into_iter()
            .filter(|f| self.fields.get(f).map_or(true, |v| v.trim().is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(AttendanceError::MissingFields(missing));
        }

        let mut take = |name: &str| self.fields.remove(name).unwrap_or_default().trim().to_string();
        let upload = AttendanceUpload {
            cohort_type: take("cohort_type"),
            cohort_number: take("cohort_number"),
            subject: take("subject"),
            class_date: take("class_date"),
            teacher_name: take("teacher_name"),
            file,
        };
        if !is_valid_class_date(&upload.class_date) {
            return Err(AttendanceError::InvalidDate(upload.class_date));
        }
        Ok(upload)
    }
}

/// A validated upload, ready to forward or process
#[derive(Debug, Clone)]
pub struct AttendanceUpload {
    pub file: CsvFile,
    pub cohort_type: String,
    pub cohort_number: String,
    pub subject: String,
    pub class_date: String,
    pub teacher_name: String,
}

impl AttendanceUpload {
    /// Display name of the cohort, e.g. "Basic 3"
    pub fn batch(&self) -> String {
        format!("{} {}", self.cohort_type, self.cohort_number)
    }

    pub fn text_fields(&self) -> [(&'static str, &str); 5] {
        [
            ("cohort_type", self.cohort_type.as_str()),
            ("cohort_number", self.cohort_number.as_str()),
            ("subject", self.subject.as_str()),
            ("class_date", self.class_date.as_str()),
            ("teacher_name", self.teacher_name.as_str()),
        ]
    }
}
