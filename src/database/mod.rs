pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::{AckMode, MemoryStore};
pub use postgres::PgRowStore;
pub use store::{Collection, Filter, Query, Row, RowStore, StoreError, UpdateAck};

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::DatabaseConfig;

/// Pick the store backend from configuration: Postgres when a URL is set, memory otherwise
pub fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn RowStore>, StoreError> {
    if config.url.is_some() {
        let store = PgRowStore::connect_lazy(config)?;
        info!("Using Postgres row store");
        Ok(Arc::new(store))
    } else {
        warn!("DATABASE_URL not set; using in-memory row store (data is lost on restart)");
        Ok(Arc::new(MemoryStore::new()))
    }
}
