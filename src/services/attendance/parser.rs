use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

use super::AttendanceError;
use crate::database::models::attendance::round2;
use crate::database::models::EnrollmentId;

static HOURS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*h").expect("hours pattern"));
static MINUTES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*m").expect("minutes pattern"));
static SECONDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*s").expect("seconds pattern"));
static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("number pattern"));
static UNVERIFIED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\(\s*unverified\s*\)").expect("unverified pattern"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

const NAME_COLUMN: usize = 0;
const DURATION_COLUMN: usize = 3;
const ROLL_NUMBER_COLUMN: usize = 12;

/// One student's aggregated presence in a meeting
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub enrollment_id: String,
    pub name: String,
    pub minutes: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeetingReport {
    pub meeting_minutes: f64,
    /// Participants in order of first appearance, one entry per enrollment id
    pub participants: Vec<Participant>,
    /// Rows that could not be attributed to a student
    pub skipped: Vec<String>,
}

/// Decode a meeting export. Reports come out of the meeting tool as UTF-16
/// with a BOM, or as UTF-8 after a spreadsheet round trip.
pub fn decode_text(bytes: &[u8]) -> String {
    match bytes {
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        _ => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            // Latin-1 maps every byte straight to a code point
            Err(_) => bytes.iter().map(|&b| b as char).collect(),
        },
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]])).collect();
    String::from_utf16_lossy(&units)
}

/// Duration text such as `1h 30m 20s`, `30m 15s` or `45s` in minutes, two decimals.
/// Without any unit the first integer is taken as minutes.
pub fn parse_duration(raw: &str) -> f64 {
    let component = |re: &Regex| {
        re.captures(raw)
            .and_then(|c| c[1].parse::<f64>().ok())
    };
    let hours = component(&*HOURS);
    let minutes = component(&*MINUTES);
    let seconds = component(&*SECONDS);

    if hours.is_none() && minutes.is_none() && seconds.is_none() {
        return FIRST_NUMBER
            .find(raw)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0);
    }
    round2(hours.unwrap_or(0.0) * 60.0 + minutes.unwrap_or(0.0) + seconds.unwrap_or(0.0) / 60.0)
}

/// Display name without the enrollment id, the `(Unverified)` marker and doubled spaces
pub fn clean_name(raw: &str, enrollment_id: &str) -> String {
    let without_id = raw.replace(enrollment_id, " ");
    let without_marker = UNVERIFIED.replace_all(&without_id, " ");
    WHITESPACE.replace_all(without_marker.trim(), " ").into_owned()
}

fn cell<'a>(columns: &[&'a str], index: usize) -> &'a str {
    columns
        .get(index)
        .copied()
        .map(|c| c.trim().trim_matches('"').trim())
        .unwrap_or("")
}

/// Parse a tab-separated meeting attendance report.
pub fn parse_report(text: &str, default_meeting_minutes: f64) -> Result<MeetingReport, AttendanceError> {
    let lines: Vec<&str> = text.lines().collect();

    let meeting_minutes = lines
        .iter()
        .find(|line| line.contains("Meeting duration"))
        .map(|line| parse_duration(cell(&line.split('\t').collect::<Vec<_>>(), 1)))
        .filter(|minutes| *minutes > 0.0)
        .unwrap_or(default_meeting_minutes);

    let header = lines
        .iter()
        .position(|line| line.contains("Name") && line.contains("In-Meeting Duration"))
        .ok_or(AttendanceError::NoParticipantSection)?;

    let mut participants: Vec<Participant> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut skipped = Vec::new();

    for line in &lines[header + 1..] {
        if line.trim().is_empty() || line.contains("In-Meeting Activities") {
            break;
        }
        let columns: Vec<&str> = line.split('\t').collect();
        let raw_name = cell(&columns, NAME_COLUMN);
        let roll_number = cell(&columns, ROLL_NUMBER_COLUMN);

        let enrollment_id = if EnrollmentId::is_valid(roll_number) {
            roll_number.to_string()
        } else if let Some(id) = EnrollmentId::find_in(raw_name) {
            id.to_string()
        } else {
            warn!("Skipping attendance row without enrollment id: {}", raw_name);
            skipped.push(raw_name.to_string());
            continue;
        };

        let minutes = parse_duration(cell(&columns, DURATION_COLUMN));
        match index.get(&enrollment_id) {
            // Rejoined the meeting: sessions add up
            Some(&at) => participants[at].minutes = round2(participants[at].minutes + minutes),
            None => {
                index.insert(enrollment_id.clone(), participants.len());
                participants.push(Participant {
                    name: clean_name(raw_name, &enrollment_id),
                    enrollment_id,
                    minutes,
                });
            }
        }
    }

    if participants.is_empty() {
        return Err(AttendanceError::NoParticipants);
    }

    Ok(MeetingReport {
        meeting_minutes,
        participants,
        skipped,
    })
}
