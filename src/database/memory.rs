use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::database::store::{
    compare_values, validate_columns, values_equal, Collection, Query, Row, RowStore, StoreError,
    UpdateAck,
};

/// How `MemoryStore::update` acknowledges writes. Hosted stores differ here,
/// so tests can pick the behaviour they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Apply the patch and report the affected row count
    #[default]
    Exact,
    /// Apply the patch but report `UpdateAck::Unknown`
    Unacknowledged,
    /// Drop the patch silently and report `UpdateAck::Unknown`
    Dropped,
}

/// In-process row store used for local runs without a database and for tests
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Collection, Vec<Row>>>,
    ack_mode: AckMode,
    next_log_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ack_mode(ack_mode: AckMode) -> Self {
        Self {
            ack_mode,
            ..Self::default()
        }
    }

    /// Replace the content of a collection
    pub async fn seed(&self, collection: Collection, rows: Vec<Row>) {
        self.tables.write().await.insert(collection, rows);
    }

    /// Snapshot of a collection, in insertion order
    pub async fn rows(&self, collection: Collection) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    fn position(rows: &[Row], collection: Collection, key: &Value) -> Option<usize> {
        rows.iter()
            .position(|r| collection.key_of(r).is_some_and(|k| values_equal(k, key)))
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn select(&self, collection: Collection, query: &Query) -> Result<Vec<Row>, StoreError> {
        validate_columns(query.columns())?;
        let tables = self.tables.read().await;
        let mut rows: Vec<Row> = tables
            .get(&collection)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                // Nulls stay last in both directions
                let nulls = a.get(&order.column).map_or(true, Value::is_null)
                    || b.get(&order.column).map_or(true, Value::is_null);
                if order.descending && !nulls {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, collection: Collection, rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(collection).or_default();

        // All-or-nothing: every row is checked before any is stored
        let mut serial = self.next_log_id.load(Ordering::SeqCst);
        let mut keys: Vec<Value> = Vec::with_capacity(rows.len());
        let mut prepared = Vec::with_capacity(rows.len());
        for mut row in rows {
            validate_columns(row.keys().map(String::as_str))?;
            if collection.key_of(&row).is_none() {
                if collection != Collection::AttendanceLogs {
                    return Err(StoreError::MissingKey {
                        collection,
                        column: collection.key_column(),
                    });
                }
                // Serial column stand-in
                serial += 1;
                row.insert(collection.key_column().to_string(), Value::from(serial));
            }
            let key = collection.key_of(&row).cloned().unwrap_or(Value::Null);
            if Self::position(table, collection, &key).is_some() || keys.iter().any(|k| values_equal(k, &key)) {
                return Err(StoreError::Conflict(format!("{} already has key {}", collection, key)));
            }
            if let Some(id) = key.as_u64().filter(|_| collection == Collection::AttendanceLogs) {
                serial = serial.max(id);
            }
            keys.push(key);
            prepared.push(row);
        }

        self.next_log_id.fetch_max(serial, Ordering::SeqCst);
        table.extend(prepared.iter().cloned());
        Ok(prepared)
    }

    async fn upsert(&self, collection: Collection, row: Row) -> Result<Row, StoreError> {
        validate_columns(row.keys().map(String::as_str))?;
        let key = collection
            .key_of(&row)
            .cloned()
            .ok_or(StoreError::MissingKey {
                collection,
                column: collection.key_column(),
            })?;

        let mut tables = self.tables.write().await;
        let table = tables.entry(collection).or_default();
        match Self::position(table, collection, &key) {
            Some(index) => {
                let existing = &mut table[index];
                for (column, value) in row {
                    existing.insert(column, value);
                }
                Ok(existing.clone())
            }
            None => {
                table.push(row.clone());
                Ok(row)
            }
        }
    }

    async fn update(&self, collection: Collection, key: &Value, patch: Row) -> Result<UpdateAck, StoreError> {
        validate_columns(patch.keys().map(String::as_str))?;
        if self.ack_mode == AckMode::Dropped {
            return Ok(UpdateAck::Unknown);
        }

        let mut tables = self.tables.write().await;
        let table = tables.entry(collection).or_default();
        let affected = match Self::position(table, collection, key) {
            Some(index) => {
                let existing = &mut table[index];
                for (column, value) in patch {
                    existing.insert(column, value);
                }
                1
            }
            None => 0,
        };

        Ok(match self.ack_mode {
            AckMode::Exact => UpdateAck::Rows(affected),
            _ => UpdateAck::Unknown,
        })
    }

    async fn delete(&self, collection: Collection, keys: &[Value]) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(&collection) else {
            return Ok(0);
        };
        let before = table.len();
        table.retain(|row| {
            !collection
                .key_of(row)
                .is_some_and(|k| keys.iter().any(|key| values_equal(k, key)))
        });
        Ok((before - table.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
