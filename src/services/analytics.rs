use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::database::models::attendance::round2;
use crate::database::models::{from_row, CohortType, FeedbackRecord, OnboardingRecord, StudentAttendance, XpRecord};
use crate::database::{Collection, RowStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortSummary {
    pub cohort_type: String,
    pub cohort_number: String,
    pub students: usize,
    pub with_attendance: usize,
    pub average_attendance: Option<f64>,
    pub total_xp: i64,
    pub average_xp: f64,
    pub average_mentor_rating: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaderboardQuery {
    pub cohort_type: Option<String>,
    pub cohort_number: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub email: String,
    pub enrollment_id: String,
    pub full_name: Option<String>,
    pub cohort_type: Option<String>,
    pub cohort_number: Option<String>,
    pub xp: i64,
}

#[derive(Default)]
struct CohortTally {
    cohort_type: String,
    students: usize,
    attendance: Vec<f64>,
    total_xp: i64,
    ratings: Vec<f64>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(round2(values.iter().sum::<f64>() / values.len() as f64))
    }
}

/// Canonical spelling for known cohort types, the trimmed input otherwise
fn display_cohort_type(raw: &str) -> String {
    raw.parse::<CohortType>()
        .map(|t| t.to_string())
        .unwrap_or_else(|_| raw.trim().to_string())
}

/// Read-only aggregates over the stored collections
pub struct AnalyticsService {
    store: Arc<dyn RowStore>,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    async fn load<T: serde::de::DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>, StoreError> {
        Ok(self
            .store
            .list(collection)
            .await?
            .into_iter()
            .filter_map(|row| from_row(row).ok())
            .collect())
    }

    /// Per-cohort student counts, attendance, XP and mentor rating averages
    pub async fn cohorts(&self) -> Result<Vec<CohortSummary>, StoreError> {
        let students: Vec<OnboardingRecord> = self.load(Collection::Onboarding).await?;
        let attendance: HashMap<String, f64> = self
            .load::<StudentAttendance>(Collection::StudentAttendance)
            .await?
            .into_iter()
            .filter(|s| s.total_classes > 0)
            .map(|s| (s.enrollment_id, s.overall_attendance))
            .collect();
        let xp: HashMap<String, i64> = self
            .load::<XpRecord>(Collection::StudentXp)
            .await?
            .into_iter()
            .map(|r| (r.enrollment_id, r.xp))
            .collect();
        let ratings: HashMap<String, f64> = self
            .load::<FeedbackRecord>(Collection::Feedback)
            .await?
            .into_iter()
            .filter_map(|f| f.mentor_rating.map(|r| (f.enrollment_id, r)))
            .collect();

        // Cohort types group case-insensitively, like the leaderboard filter
        let mut tallies: BTreeMap<(String, String), CohortTally> = BTreeMap::new();
        for student in &students {
            let (cohort_type, cohort_number) = student.cohort_key();
            let cohort_type = display_cohort_type(&cohort_type);
            let key = (cohort_type.to_lowercase(), cohort_number.trim().to_string());
            let tally = tallies.entry(key).or_insert_with(|| CohortTally {
                cohort_type,
                ..CohortTally::default()
            });
            tally.students += 1;
            if let Some(pct) = attendance.get(&student.enrollment_id) {
                tally.attendance.push(*pct);
            }
            tally.total_xp += xp.get(&student.enrollment_id).copied().unwrap_or(0);
            if let Some(rating) = ratings.get(&student.enrollment_id) {
                tally.ratings.push(*rating);
            }
        }

        Ok(tallies
            .into_iter()
            .map(|((_, cohort_number), tally)| CohortSummary {
                cohort_type: tally.cohort_type,
                cohort_number,
                students: tally.students,
                with_attendance: tally.attendance.len(),
                average_attendance: mean(&tally.attendance),
                total_xp: tally.total_xp,
                average_xp: round2(tally.total_xp as f64 / tally.students as f64),
                average_mentor_rating: mean(&tally.ratings),
            })
            .collect())
    }

    /// XP ranking, highest first; ties are ordered by name
    pub async fn leaderboard(&self, query: &LeaderboardQuery) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let selected = |wanted: &Option<String>, actual: &Option<String>| match wanted.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(w) => actual.as_deref().is_some_and(|a| a.trim().eq_ignore_ascii_case(w)),
        };

        let mut records: Vec<XpRecord> = self
            .load::<XpRecord>(Collection::StudentXp)
            .await?
            .into_iter()
            .filter(|r| selected(&query.cohort_type, &r.cohort_type) && selected(&query.cohort_number, &r.cohort_number))
            .collect();
        records.sort_by(|a, b| {
            b.xp.cmp(&a.xp)
                .then_with(|| a.full_name.cmp(&b.full_name))
                .then_with(|| a.email.cmp(&b.email))
        });

        Ok(records
            .into_iter()
            .take(query.limit.unwrap_or(usize::MAX))
            .enumerate()
            .map(|(i, r)| LeaderboardEntry {
                rank: i + 1,
                email: r.email,
                enrollment_id: r.enrollment_id,
                full_name: r.full_name,
                cohort_type: r.cohort_type,
                cohort_number: r.cohort_number,
                xp: r.xp,
            })
            .collect())
    }
}
