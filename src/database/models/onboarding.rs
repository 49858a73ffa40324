use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::string_or_number;
use crate::database::store::Row;

static ENROLLMENT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2})MBY(\d{4})$").expect("enrollment id pattern"));

static ENROLLMENT_ID_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{2}MBY\d{4})\b").expect("embedded enrollment id pattern"));

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"));

/// Student enrollment id such as `25MBY3001`: two-digit intake year, literal `MBY`, four-digit sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnrollmentId {
    pub year: u8,
    pub sequence: u16,
}

impl EnrollmentId {
    pub fn new(year: u8, sequence: u16) -> Self {
        Self { year: year % 100, sequence }
    }

    pub fn is_valid(raw: &str) -> bool {
        ENROLLMENT_ID.is_match(raw.trim())
    }

    /// First enrollment id embedded in free text, e.g. a meeting display name
    pub fn find_in(text: &str) -> Option<EnrollmentId> {
        ENROLLMENT_ID_IN_TEXT
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Highest sequence that still fits the four-digit pattern
    pub const MAX_SEQUENCE: u16 = 9999;

    /// Next free id for `year`, one past the highest sequence already used that year.
    /// `None` once the year's sequence space is used up.
    pub fn next_after<'a>(
        existing: impl IntoIterator<Item = &'a str>,
        year: u32,
        first_sequence: u16,
    ) -> Option<EnrollmentId> {
        let year = (year % 100) as u8;
        let highest = existing
            .into_iter()
            .filter_map(|raw| raw.parse::<EnrollmentId>().ok())
            .filter(|id| id.year == year)
            .map(|id| id.sequence)
            .max();

        let sequence = match highest {
            Some(sequence) => sequence.checked_add(1)?.max(first_sequence),
            None => first_sequence,
        };
        (sequence <= Self::MAX_SEQUENCE).then(|| EnrollmentId::new(year, sequence))
    }
}

impl FromStr for EnrollmentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = ENROLLMENT_ID
            .captures(s.trim())
            .ok_or_else(|| format!("'{}' is not an enrollment id (expected e.g. 25MBY3001)", s))?;
        let year = caps[1].parse::<u8>().map_err(|e| e.to_string())?;
        let sequence = caps[2].parse::<u16>().map_err(|e| e.to_string())?;
        Ok(EnrollmentId { year, sequence })
    }
}

impl fmt::Display for EnrollmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}MBY{:04}", self.year, self.sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CohortType {
    Basic,
    Placement,
    #[serde(rename = "MERN")]
    Mern,
    #[serde(rename = "Full Stack")]
    FullStack,
}

impl CohortType {
    pub const ALL: [CohortType; 4] = [
        CohortType::Basic,
        CohortType::Placement,
        CohortType::Mern,
        CohortType::FullStack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CohortType::Basic => "Basic",
            CohortType::Placement => "Placement",
            CohortType::Mern => "MERN",
            CohortType::FullStack => "Full Stack",
        }
    }
}

impl fmt::Display for CohortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CohortType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        CohortType::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!(
                    "unknown cohort type '{}' (expected one of Basic, Placement, MERN, Full Stack)",
                    s
                )
            })
    }
}

/// One row of the `onboarding` collection. Columns this service does not
/// interpret (contact details, essays) ride along in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingRecord {
    #[serde(rename = "EnrollmentID")]
    pub enrollment_id: String,
    #[serde(rename = "Full Name", default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(rename = "Email", default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "Cohort Type", default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub cohort_type: Option<String>,
    #[serde(rename = "Cohort Number", default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub cohort_number: Option<String>,
    #[serde(flatten)]
    pub extra: Row,
}

impl OnboardingRecord {
    /// Trimmed email, if the record has a usable one
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }

    pub fn cohort_key(&self) -> (String, String) {
        (
            self.cohort_type.clone().unwrap_or_default(),
            self.cohort_number.clone().unwrap_or_default(),
        )
    }
}

/// Submission of the onboarding form. The enrollment id is assigned by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct OnboardingForm {
    #[serde(rename = "Full Name", default)]
    pub full_name: String,
    #[serde(rename = "Email", default)]
    pub email: String,
    #[serde(rename = "Cohort Type", default)]
    pub cohort_type: String,
    #[serde(rename = "Cohort Number", default, deserialize_with = "string_or_number")]
    pub cohort_number: Option<String>,
    #[serde(flatten)]
    pub extra: Row,
}

impl OnboardingForm {
    /// Field-level validation; returns field -> message for every problem found
    pub fn validate(&self) -> Result<CohortType, HashMap<String, String>> {
        let mut errors = HashMap::new();

        if self.full_name.trim().is_empty() {
            errors.insert("Full Name".to_string(), "This field is required".to_string());
        }
        if self.email.trim().is_empty() {
            errors.insert("Email".to_string(), "This field is required".to_string());
        } else if !EMAIL.is_match(self.email.trim()) {
            errors.insert("Email".to_string(), format!("'{}' is not a valid email", self.email.trim()));
        }
        if self.cohort_number.as_deref().map_or(true, |n| n.trim().is_empty()) {
            errors.insert("Cohort Number".to_string(), "This field is required".to_string());
        }
        if self.extra.contains_key("EnrollmentID") {
            errors.insert("EnrollmentID".to_string(), "Assigned by the server".to_string());
        }

        let cohort_type = match self.cohort_type.parse::<CohortType>() {
            Ok(cohort_type) => Some(cohort_type),
            Err(msg) => {
                errors.insert("Cohort Type".to_string(), msg);
                None
            }
        };

        match cohort_type {
            Some(cohort_type) if errors.is_empty() => Ok(cohort_type),
            _ => Err(errors),
        }
    }

    pub fn into_record(self, enrollment_id: EnrollmentId, cohort_type: CohortType) -> OnboardingRecord {
        OnboardingRecord {
            enrollment_id: enrollment_id.to_string(),
            full_name: Some(self.full_name.trim().to_string()),
            email: Some(self.email.trim().to_string()),
            cohort_type: Some(cohort_type.to_string()),
            cohort_number: self.cohort_number.map(|n| n.trim().to_string()),
            extra: self.extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{from_row, to_row};
    use serde_json::json;

    #[test]
    fn parses_and_formats_enrollment_ids() {
        let id: EnrollmentId = "25MBY3001".parse().unwrap();
        assert_eq!(id, EnrollmentId::new(25, 3001));
        assert_eq!(id.to_string(), "25MBY3001");
        assert_eq!(EnrollmentId::new(5, 7).to_string(), "05MBY0007");
        assert!("25MBY301".parse::<EnrollmentId>().is_err());
        assert!("25mby3001".parse::<EnrollmentId>().is_err());
        assert!(EnrollmentId::is_valid(" 24MBY2068 "));
    }

    #[test]
    fn finds_ids_inside_display_names() {
        assert_eq!(
            EnrollmentId::find_in("Asha Rao 25MBY3004 (Unverified)"),
            Some(EnrollmentId::new(25, 3004))
        );
        assert_eq!(EnrollmentId::find_in("x25MBY3004"), None);
        assert_eq!(EnrollmentId::find_in("Guest"), None);
    }

    #[test]
    fn next_id_continues_the_year() {
        let existing = ["25MBY3001", "25MBY3007", "24MBY2068", "junk"];
        assert_eq!(EnrollmentId::next_after(existing, 25, 1001).unwrap().to_string(), "25MBY3008");
        assert_eq!(EnrollmentId::next_after(existing, 26, 1001).unwrap().to_string(), "26MBY1001");
        assert_eq!(EnrollmentId::next_after(existing, 2025, 1001).unwrap().to_string(), "25MBY3008");
    }

    #[test]
    fn next_id_stops_at_four_digits() {
        assert_eq!(EnrollmentId::next_after(["25MBY9998"], 25, 1001).unwrap().to_string(), "25MBY9999");
        assert_eq!(EnrollmentId::next_after(["25MBY9999"], 25, 1001), None);
    }

    #[test]
    fn cohort_types_parse_loosely() {
        assert_eq!("mern".parse::<CohortType>().unwrap(), CohortType::Mern);
        assert_eq!("Full Stack".parse::<CohortType>().unwrap(), CohortType::FullStack);
        assert!("Data Science".parse::<CohortType>().is_err());
        assert_eq!(serde_json::to_value(CohortType::FullStack).unwrap(), json!("Full Stack"));
    }

    #[test]
    fn onboarding_rows_keep_unknown_columns() {
        let row = json!({
            "EnrollmentID": "25MBY3001",
            "Email": "a@x.com",
            "Cohort Number": 3,
            "Why MentiBY?": "essay"
        });
        let record: OnboardingRecord = from_row(row.as_object().cloned().unwrap()).unwrap();
        assert_eq!(record.cohort_number.as_deref(), Some("3"));
        assert_eq!(record.email(), Some("a@x.com"));
        assert_eq!(record.extra["Why MentiBY?"], json!("essay"));

        let back = to_row(&record).unwrap();
        assert_eq!(back["Why MentiBY?"], json!("essay"));
        assert_eq!(back["EnrollmentID"], json!("25MBY3001"));
    }

    #[test]
    fn form_validation_collects_every_problem() {
        let form: OnboardingForm = serde_json::from_value(json!({
            "Full Name": " ",
            "Email": "not-an-email",
            "Cohort Type": "Data Science"
        }))
        .unwrap();
        let errors = form.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains_key("Cohort Number"));
    }

    #[test]
    fn valid_form_becomes_record() {
        let form: OnboardingForm = serde_json::from_value(json!({
            "Full Name": "Asha Rao",
            "Email": "asha@x.com",
            "Cohort Type": "mern",
            "Cohort Number": "3",
            "Phone Number": "99999"
        }))
        .unwrap();
        let cohort = form.validate().unwrap();
        let record = form.into_record(EnrollmentId::new(25, 3001), cohort);
        assert_eq!(record.cohort_type.as_deref(), Some("MERN"));
        assert_eq!(record.extra["Phone Number"], json!("99999"));
    }
}
