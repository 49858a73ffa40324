use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::database::models::{from_row, to_row, OnboardingRecord, XpRecord};
use crate::database::{Collection, RowStore, StoreError};
use crate::services::xp_provider::{XpLookup, XpProvider};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to list users: {0}")]
    ListUsers(#[source] StoreError),

    #[error("XP sync already in progress")]
    AlreadyRunning,
}

/// Pacing of one sync run
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub request_delay: Duration,
    pub rate_limit_cooldown: Duration,
}

impl SyncSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            request_delay: config.xp_request_delay(),
            rate_limit_cooldown: config.xp_rate_limit_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub message: String,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub rate_limited: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub timestamp: Option<DateTime<Utc>>,
}

enum UserOutcome {
    Synced(i64),
    NoData(String),
}

/// The provider's error text is the only rate-limit signal available
pub fn is_rate_limit_error(message: &str) -> bool {
    message.to_lowercase().contains("rate limit")
}

/// Copies cumulative XP for every onboarded student from the provider into `student_xp`.
/// Users are processed strictly one after another with a pause in between.
pub struct XpSyncJob {
    store: Arc<dyn RowStore>,
    provider: Arc<dyn XpProvider>,
    settings: SyncSettings,
}

impl XpSyncJob {
    pub fn new(store: Arc<dyn RowStore>, provider: Arc<dyn XpProvider>, settings: SyncSettings) -> Self {
        Self { store, provider, settings }
    }

    pub async fn run(&self) -> Result<SyncSummary, SyncError> {
        let started_at = Utc::now();

        let rows = self
            .store
            .list(Collection::Onboarding)
            .await
            .map_err(SyncError::ListUsers)?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            match from_row::<OnboardingRecord>(row) {
                Ok(record) if record.email().is_some() => users.push(record),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable onboarding row: {}", e),
            }
        }

        let mut summary = SyncSummary {
            total: users.len(),
            started_at: Some(started_at),
            ..Default::default()
        };

        if users.is_empty() {
            info!("XP sync: no users found");
            summary.message = "No users found".to_string();
            summary.timestamp = Some(Utc::now());
            return Ok(summary);
        }

        info!("XP sync: starting for {} users", users.len());
        let last = users.len() - 1;
        for (index, record) in users.iter().enumerate() {
            let email = record.email().unwrap_or_default();

            match self.sync_user(record, email).await {
                Ok(UserOutcome::Synced(xp)) => {
                    summary.success += 1;
                    info!("XP sync: {} ({}) -> {} xp", record.enrollment_id, email, xp);
                }
                Ok(UserOutcome::NoData(status)) => {
                    summary.skipped += 1;
                    warn!("XP sync: no data for {} ({}), status '{}'", record.enrollment_id, email, status);
                }
                Err(message) => {
                    summary.failed += 1;
                    error!("XP sync: {} ({}) failed: {}", record.enrollment_id, email, message);
                    let rate_limited = is_rate_limit_error(&message);
                    summary.errors.push(format!("{}: {}", email, message));
                    if rate_limited {
                        summary.rate_limited += 1;
                        warn!(
                            "XP sync: rate limit hit, cooling down for {:?}",
                            self.settings.rate_limit_cooldown
                        );
                        tokio::time::sleep(self.settings.rate_limit_cooldown).await;
                    }
                }
            }

            if index < last {
                tokio::time::sleep(self.settings.request_delay).await;
            }
        }

        summary.message = format!(
            "XP sync completed: {} succeeded, {} failed, {} without data",
            summary.success, summary.failed, summary.skipped
        );
        summary.timestamp = Some(Utc::now());
        info!("{}", summary.message);
        Ok(summary)
    }

    async fn sync_user(&self, record: &OnboardingRecord, email: &str) -> Result<UserOutcome, String> {
        let xp = match self.provider.cumulative_xp(email).await.map_err(|e| e.to_string())? {
            XpLookup::Found(xp) => xp,
            XpLookup::NoData { status } => return Ok(UserOutcome::NoData(status)),
        };

        let row = to_row(&XpRecord::from_onboarding(record, email, xp, Utc::now())).map_err(|e| e.to_string())?;
        self.store
            .upsert(Collection::StudentXp, row)
            .await
            .map_err(|e| e.to_string())?;
        Ok(UserOutcome::Synced(xp))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub last_summary: Option<SyncSummary>,
}

/// Owns the sync job plus the bookkeeping of past runs. One instance lives in
/// the application state; at most one run is in flight at a time.
pub struct SyncCoordinator {
    job: XpSyncJob,
    running: AtomicBool,
    last_fetch_time: RwLock<Option<DateTime<Utc>>>,
    last_summary: RwLock<Option<SyncSummary>>,
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncCoordinator {
    pub fn new(job: XpSyncJob) -> Self {
        Self {
            job,
            running: AtomicBool::new(false),
            last_fetch_time: RwLock::new(None),
            last_summary: RwLock::new(None),
        }
    }

    pub async fn run(&self) -> Result<SyncSummary, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        *self.last_fetch_time.write().await = Some(Utc::now());
        let summary = self.job.run().await?;
        *self.last_summary.write().await = Some(summary.clone());
        Ok(summary)
    }

    /// Run only when the previous run started longer than `max_age` ago
    pub async fn run_if_stale(&self, max_age: Duration) -> Option<Result<SyncSummary, SyncError>> {
        if !self.is_stale(max_age, Utc::now()).await {
            return None;
        }
        Some(self.run().await)
    }

    async fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        match *self.last_fetch_time.read().await {
            None => true,
            Some(last) => now
                .signed_duration_since(last)
                .to_std()
                .map_or(false, |elapsed| elapsed >= max_age),
        }
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            running: self.running.load(Ordering::SeqCst),
            last_fetch_time: *self.last_fetch_time.read().await,
            last_summary: self.last_summary.read().await.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryStore, Row};
    use crate::services::xp_provider::XpProviderError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Scripted provider: answers per email, records every call
    #[derive(Default)]
    struct FakeProvider {
        answers: HashMap<String, Result<XpLookup, String>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn with(mut self, email: &str, answer: Result<XpLookup, String>) -> Self {
            self.answers.insert(email.to_string(), answer);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl XpProvider for FakeProvider {
        async fn cumulative_xp(&self, email: &str) -> Result<XpLookup, XpProviderError> {
            self.calls.lock().unwrap().push(email.to_string());
            match self.answers.get(email) {
                Some(Ok(lookup)) => Ok(lookup.clone()),
                Some(Err(msg)) if msg == "429" => Err(XpProviderError::RateLimited),
                Some(Err(msg)) => Err(XpProviderError::Malformed(msg.clone())),
                None => Ok(XpLookup::NoData { status: "unknown_user".to_string() }),
            }
        }
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            request_delay: Duration::from_millis(1200),
            rate_limit_cooldown: Duration::from_secs(300),
        }
    }

    async fn seeded_store(rows: Vec<Value>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(Collection::Onboarding, rows.into_iter().map(row).collect())
            .await;
        store
    }

    #[tokio::test(start_paused = true)]
    async fn stores_provider_xp() {
        let store = seeded_store(vec![json!({"EnrollmentID": "25MBY3001", "Email": "a@x.com", "Full Name": "Asha"})]).await;
        let provider = Arc::new(FakeProvider::default().with("a@x.com", Ok(XpLookup::Found(418))));
        let job = XpSyncJob::new(store.clone(), provider.clone(), settings());

        let summary = job.run().await.unwrap();
        assert_eq!((summary.total, summary.success, summary.failed), (1, 1, 0));

        let xp = store.rows(Collection::StudentXp).await;
        assert_eq!(xp.len(), 1);
        assert_eq!(xp[0]["enrollment_id"], json!("25MBY3001"));
        assert_eq!(xp[0]["email"], json!("a@x.com"));
        assert_eq!(xp[0]["xp"], json!(418));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_user_list_never_calls_provider() {
        let store = seeded_store(vec![json!({"EnrollmentID": "25MBY3001", "Email": "  "})]).await;
        let provider = Arc::new(FakeProvider::default());
        let job = XpSyncJob::new(store, provider.clone(), settings());

        let summary = job.run().await.unwrap();
        assert_eq!(summary.message, "No users found");
        assert_eq!(summary.total, 0);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn non_ok_status_is_skipped_not_failed() {
        let store = seeded_store(vec![json!({"EnrollmentID": "25MBY3001", "Email": "ghost@x.com"})]).await;
        store
            .seed(
                Collection::StudentXp,
                vec![row(json!({"email": "ghost@x.com", "enrollment_id": "25MBY3001", "xp": 7, "last_updated": "2025-01-01T00:00:00Z"}))],
            )
            .await;
        let job = XpSyncJob::new(store.clone(), Arc::new(FakeProvider::default()), settings());

        let summary = job.run().await.unwrap();
        assert_eq!((summary.success, summary.failed, summary.skipped), (0, 0, 1));
        assert!(summary.errors.is_empty());
        let xp = store.rows(Collection::StudentXp).await;
        assert_eq!(xp[0]["xp"], json!(7));
        assert_eq!(xp[0]["last_updated"], json!("2025-01-01T00:00:00Z"));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_collected_and_run_continues() {
        let store = seeded_store(vec![
            json!({"EnrollmentID": "25MBY3001", "Email": "a@x.com"}),
            json!({"EnrollmentID": "25MBY3002", "Email": "b@x.com"}),
            json!({"EnrollmentID": "25MBY3003", "Email": "c@x.com"}),
        ])
        .await;
        let provider = Arc::new(
            FakeProvider::default()
                .with("a@x.com", Ok(XpLookup::Found(10)))
                .with("b@x.com", Err("boom".to_string()))
                .with("c@x.com", Ok(XpLookup::Found(30))),
        );
        let job = XpSyncJob::new(store.clone(), provider.clone(), settings());

        let started = Instant::now();
        let summary = job.run().await.unwrap();
        assert_eq!((summary.success, summary.failed, summary.rate_limited), (2, 1, 0));
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("b@x.com"));
        assert_eq!(provider.calls(), vec!["a@x.com", "b@x.com", "c@x.com"]);
        // two pauses between three users
        assert!(started.elapsed() >= Duration::from_millis(2400));
        assert!(started.elapsed() < Duration::from_secs(300));
        assert_eq!(store.rows(Collection::StudentXp).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_triggers_cooldown() {
        let store = seeded_store(vec![
            json!({"EnrollmentID": "25MBY3001", "Email": "a@x.com"}),
            json!({"EnrollmentID": "25MBY3002", "Email": "b@x.com"}),
        ])
        .await;
        let provider = Arc::new(
            FakeProvider::default()
                .with("a@x.com", Err("429".to_string()))
                .with("b@x.com", Ok(XpLookup::Found(5))),
        );
        let job = XpSyncJob::new(store, provider.clone(), settings());

        let started = Instant::now();
        let summary = job.run().await.unwrap();
        assert_eq!((summary.success, summary.failed, summary.rate_limited), (1, 1, 1));
        assert!(started.elapsed() >= Duration::from_secs(300));
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn rerun_only_refreshes_timestamp() {
        let store = seeded_store(vec![json!({"EnrollmentID": "25MBY3001", "Email": "a@x.com"})]).await;
        let provider = Arc::new(FakeProvider::default().with("a@x.com", Ok(XpLookup::Found(418))));
        let job = XpSyncJob::new(store.clone(), provider, settings());

        job.run().await.unwrap();
        let mut first = store.rows(Collection::StudentXp).await;
        // Real clock: `last_updated` comes from Utc::now()
        tokio::time::sleep(Duration::from_millis(20)).await;
        job.run().await.unwrap();
        let mut second = store.rows(Collection::StudentXp).await;

        let stamp = |row: &mut Row| -> DateTime<Utc> {
            serde_json::from_value(row.remove("last_updated").unwrap()).unwrap()
        };
        assert!(stamp(&mut second[0]) > stamp(&mut first[0]));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn listing_failure_aborts() {
        struct BrokenStore;

        #[async_trait]
        impl RowStore for BrokenStore {
            fn backend(&self) -> &'static str {
                "broken"
            }
            async fn select(&self, _: Collection, _: &crate::database::Query) -> Result<Vec<Row>, StoreError> {
                Err(StoreError::QueryError("connection refused".to_string()))
            }
            async fn insert(&self, _: Collection, _: Vec<Row>) -> Result<Vec<Row>, StoreError> {
                unreachable!()
            }
            async fn upsert(&self, _: Collection, _: Row) -> Result<Row, StoreError> {
                unreachable!()
            }
            async fn update(&self, _: Collection, _: &Value, _: Row) -> Result<crate::database::UpdateAck, StoreError> {
                unreachable!()
            }
            async fn delete(&self, _: Collection, _: &[Value]) -> Result<u64, StoreError> {
                unreachable!()
            }
            async fn health_check(&self) -> Result<(), StoreError> {
                Err(StoreError::QueryError("down".to_string()))
            }
        }

        let job = XpSyncJob::new(Arc::new(BrokenStore), Arc::new(FakeProvider::default()), settings());
        assert!(matches!(job.run().await, Err(SyncError::ListUsers(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn coordinator_tracks_runs_and_staleness() {
        let store = seeded_store(vec![]).await;
        let job = XpSyncJob::new(store, Arc::new(FakeProvider::default()), settings());
        let coordinator = SyncCoordinator::new(job);

        assert!(coordinator.status().await.last_fetch_time.is_none());
        assert!(coordinator.run_if_stale(Duration::from_secs(3600)).await.is_some());

        let status = coordinator.status().await;
        assert!(!status.running);
        assert!(status.last_fetch_time.is_some());
        assert_eq!(status.last_summary.unwrap().message, "No users found");

        // just ran, so not stale yet
        assert!(coordinator.run_if_stale(Duration::from_secs(3600)).await.is_none());
        assert!(coordinator.run_if_stale(Duration::ZERO).await.is_some());
    }

    #[tokio::test]
    async fn coordinator_rejects_overlapping_runs() {
        let store = seeded_store(vec![]).await;
        let job = XpSyncJob::new(store, Arc::new(FakeProvider::default()), settings());
        let coordinator = SyncCoordinator::new(job);

        coordinator.running.store(true, Ordering::SeqCst);
        assert!(matches!(coordinator.run().await, Err(SyncError::AlreadyRunning)));
        coordinator.running.store(false, Ordering::SeqCst);
        assert!(coordinator.run().await.is_ok());
    }

    #[test]
    fn rate_limit_detection_is_case_insensitive() {
        assert!(is_rate_limit_error("Rate limit exceeded"));
        assert!(is_rate_limit_error("XP provider rate limit exceeded"));
        assert!(!is_rate_limit_error("HTTP 500: internal error"));
    }
}
