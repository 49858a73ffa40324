use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::config::AppConfig;
use crate::database::{open_store, RowStore, StoreError};
use crate::services::xp_sync::SyncSettings;
use crate::services::{
    AnalyticsService, AttendanceError, AttendanceProcessor, AttendanceProxy, HttpXpProvider, RecordService,
    SyncCoordinator, XpProvider, XpSyncJob,
};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("attendance processor: {0}")]
    Attendance(#[from] AttendanceError),
}

/// Shared handles for every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn RowStore>,
    pub records: Arc<RecordService>,
    pub analytics: Arc<AnalyticsService>,
    /// Absent when no XP provider is configured
    pub sync: Option<Arc<SyncCoordinator>>,
    pub processor: Arc<AttendanceProcessor>,
    pub proxy: Arc<AttendanceProxy>,
}

impl AppState {
    /// Open the configured store and build the HTTP XP provider from the environment
    pub fn from_config(config: AppConfig) -> Result<Self, StateError> {
        let store = open_store(&config.database)?;
        let provider: Option<Arc<dyn XpProvider>> = match HttpXpProvider::new(&config.xp) {
            Ok(provider) => Some(Arc::new(provider)),
            Err(e) => {
                warn!("XP sync disabled: {}", e);
                None
            }
        };
        Self::with_parts(config, store, provider)
    }

    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn RowStore>,
        provider: Option<Arc<dyn XpProvider>>,
    ) -> Result<Self, StateError> {
        let sync = provider.map(|provider| {
            let job = XpSyncJob::new(store.clone(), provider, SyncSettings::from_config(&config));
            Arc::new(SyncCoordinator::new(job))
        });
        let proxy = AttendanceProxy::new(&config.attendance)?;

        Ok(Self {
            records: Arc::new(RecordService::new(
                store.clone(),
                config.attendance.enrollment_first_sequence,
            )),
            analytics: Arc::new(AnalyticsService::new(store.clone())),
            processor: Arc::new(AttendanceProcessor::new(store.clone(), &config.attendance)),
            proxy: Arc::new(proxy),
            sync,
            store,
            config: Arc::new(config),
        })
    }
}
