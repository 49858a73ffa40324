use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row as _};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::database::store::{
    validate_columns, Collection, Filter, Query, Row, RowStore, StoreError, UpdateAck,
};

/// Row store over a Postgres database. Rows travel as JSONB in both directions
/// (`to_jsonb` on the way out, `jsonb_populate_record` on the way in), so no
/// per-table column mapping is needed.
pub struct PgRowStore {
    pool: PgPool,
}

/// Bind parameter for a generated statement
#[derive(Debug, Clone, PartialEq)]
enum Bind {
    Text(String),
    Json(Value),
}

impl PgRowStore {
    /// Build a lazily-connecting pool so the service can start before the database is reachable
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let database_url = config
            .url
            .as_deref()
            .ok_or(StoreError::ConfigMissing("DATABASE_URL"))?;
        url::Url::parse(database_url).map_err(|_| StoreError::InvalidDatabaseUrl)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect_lazy(database_url)?;

        info!("Created lazy Postgres pool (max {} connections)", config.max_connections);
        Ok(Self { pool })
    }

    async fn fetch_rows(&self, sql: &str, binds: Vec<Bind>) -> Result<Vec<Row>, StoreError> {
        debug!(sql, "store query");
        let rows = bind_all(sqlx::query(sql), binds)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match row.try_get::<Value, _>("row")? {
                Value::Object(map) => out.push(map),
                other => return Err(StoreError::QueryError(format!("unexpected row shape: {}", other))),
            }
        }
        Ok(out)
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    binds: Vec<Bind>,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for bind in binds {
        query = match bind {
            Bind::Text(text) => query.bind(text),
            Bind::Json(value) => query.bind(value),
        };
    }
    query
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict(db_err.message().to_string());
        }
    }
    StoreError::Sqlx(err)
}

/// Quote SQL identifier to prevent injection
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn where_clause(query: &Query, binds: &mut Vec<Bind>) -> String {
    let mut clauses = Vec::new();
    for filter in &query.filters {
        match filter {
            Filter::Eq(column, value) => {
                binds.push(Bind::Text(column.clone()));
                binds.push(Bind::Json(value.clone()));
                clauses.push(format!(
                    "(to_jsonb(t) -> ${}::text) = ${}::jsonb",
                    binds.len() - 1,
                    binds.len()
                ));
            }
            Filter::In(column, values) => {
                binds.push(Bind::Text(column.clone()));
                binds.push(Bind::Json(Value::Array(values.clone())));
                clauses.push(format!(
                    "${}::jsonb @> jsonb_build_array(to_jsonb(t) -> ${}::text)",
                    binds.len(),
                    binds.len() - 1
                ));
            }
        }
    }
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn build_select(collection: Collection, query: &Query) -> Result<(String, Vec<Bind>), StoreError> {
    validate_columns(query.columns())?;

    let mut binds = Vec::new();
    let mut sql = format!(
        "SELECT to_jsonb(t) AS row FROM {} AS t",
        quote_identifier(collection.table_name())
    );
    sql.push_str(&where_clause(query, &mut binds));
    if let Some(order) = &query.order_by {
        sql.push_str(&format!(
            " ORDER BY t.{} {} NULLS LAST",
            quote_identifier(&order.column),
            if order.descending { "DESC" } else { "ASC" }
        ));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    Ok((sql, binds))
}

fn build_insert(collection: Collection, row: &Row, upsert: bool) -> Result<String, StoreError> {
    let key = collection.key_column();
    if collection.key_of(row).is_none() && (upsert || collection != Collection::AttendanceLogs) {
        return Err(StoreError::MissingKey { collection, column: key });
    }
    validate_columns(row.keys().map(String::as_str))?;

    let table = quote_identifier(collection.table_name());
    let columns: Vec<String> = row.keys().map(|c| quote_identifier(c)).collect();
    let column_list = columns.join(", ");

    let mut sql = format!(
        "INSERT INTO {table} AS t ({column_list}) SELECT {column_list} FROM jsonb_populate_record(NULL::{table}, $1::jsonb)"
    );

    if upsert {
        let updates: Vec<String> = row
            .keys()
            .filter(|c| c.as_str() != key)
            .map(|c| format!("{0} = EXCLUDED.{0}", quote_identifier(c)))
            .collect();
        let set_list = if updates.is_empty() {
            format!("{0} = EXCLUDED.{0}", quote_identifier(key))
        } else {
            updates.join(", ")
        };
        sql.push_str(&format!(" ON CONFLICT ({}) DO UPDATE SET {}", quote_identifier(key), set_list));
    }

    sql.push_str(" RETURNING to_jsonb(t) AS row");
    Ok(sql)
}

fn build_update(collection: Collection, patch: &Row) -> Result<String, StoreError> {
    validate_columns(patch.keys().map(String::as_str))?;
    if patch.is_empty() {
        return Err(StoreError::QueryError("update with no columns".to_string()));
    }

    let table = quote_identifier(collection.table_name());
    let assignments: Vec<String> = patch
        .keys()
        .map(|c| format!("{0} = p.{0}", quote_identifier(c)))
        .collect();

    Ok(format!(
        "UPDATE {table} AS t SET {} FROM jsonb_populate_record(NULL::{table}, $1::jsonb) AS p WHERE (to_jsonb(t) -> $2::text) = $3::jsonb",
        assignments.join(", ")
    ))
}

fn build_delete(collection: Collection) -> String {
    format!(
        "DELETE FROM {} AS t WHERE $2::jsonb @> jsonb_build_array(to_jsonb(t) -> $1::text)",
        quote_identifier(collection.table_name())
    )
}

#[async_trait]
impl RowStore for PgRowStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn select(&self, collection: Collection, query: &Query) -> Result<Vec<Row>, StoreError> {
        let (sql, binds) = build_select(collection, query)?;
        self.fetch_rows(&sql, binds).await
    }

    async fn insert(&self, collection: Collection, rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
        let mut inserted = Vec::with_capacity(rows.len());
        let mut tx = self.pool.begin().await?;
        for row in rows {
            let sql = build_insert(collection, &row, false)?;
            let record = sqlx::query(&sql)
                .bind(Value::Object(row))
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            if let Value::Object(map) = record.try_get::<Value, _>("row")? {
                inserted.push(map);
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn upsert(&self, collection: Collection, row: Row) -> Result<Row, StoreError> {
        let sql = build_insert(collection, &row, true)?;
        let mut rows = self.fetch_rows(&sql, vec![Bind::Json(Value::Object(row))]).await?;
        rows.pop()
            .ok_or_else(|| StoreError::QueryError(format!("upsert into {} returned nothing", collection)))
    }

    async fn update(&self, collection: Collection, key: &Value, patch: Row) -> Result<UpdateAck, StoreError> {
        let sql = build_update(collection, &patch)?;
        let result = sqlx::query(&sql)
            .bind(Value::Object(patch))
            .bind(collection.key_column().to_string())
            .bind(key.clone())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(UpdateAck::Rows(result.rows_affected()))
    }

    async fn delete(&self, collection: Collection, keys: &[Value]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(&build_delete(collection))
            .bind(collection.key_column().to_string())
            .bind(Value::Array(keys.to_vec()))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
