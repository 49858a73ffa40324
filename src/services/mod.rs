pub mod analytics;
pub mod attendance;
pub mod records;
pub mod scheduler;
pub mod xp_provider;
pub mod xp_sync;

pub use analytics::AnalyticsService;
pub use attendance::{AttendanceError, AttendanceProcessor, AttendanceProxy};
pub use records::{RecordError, RecordService, SetFieldOutcome};
pub use scheduler::SyncScheduler;
pub use xp_provider::{HttpXpProvider, XpProvider, XpProviderError};
pub use xp_sync::{SyncCoordinator, SyncError, SyncSummary, XpSyncJob};
