use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A record as the store hands it out: column name -> JSON value
pub type Row = Map<String, Value>;

/// Errors from any RowStore implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    #[error("Row for {collection} is missing key column {column}")]
    MissingKey {
        collection: Collection,
        column: &'static str,
    },

    #[error("Duplicate key in {0}")]
    Conflict(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Named record collections and the column each one is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Onboarding,
    StudentXp,
    Feedback,
    AttendanceLogs,
    StudentAttendance,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Onboarding,
        Collection::StudentXp,
        Collection::Feedback,
        Collection::AttendanceLogs,
        Collection::StudentAttendance,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Onboarding => "onboarding",
            Collection::StudentXp => "student_xp",
            Collection::Feedback => "feedback",
            Collection::AttendanceLogs => "attendance_logs",
            Collection::StudentAttendance => "stu",
        }
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            Collection::Onboarding | Collection::Feedback => "EnrollmentID",
            Collection::StudentXp => "email",
            Collection::AttendanceLogs => "log_id",
            Collection::StudentAttendance => "enrollment_id",
        }
    }

    /// Turn a key taken from a URL path into the JSON value stored in the key column
    pub fn key_value(&self, raw: &str) -> Value {
        match self {
            Collection::AttendanceLogs => raw
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(raw.to_string())),
            _ => Value::String(raw.to_string()),
        }
    }

    pub fn key_of<'a>(&self, row: &'a Row) -> Option<&'a Value> {
        row.get(self.key_column()).filter(|v| !v.is_null())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onboarding" => Ok(Collection::Onboarding),
            "student_xp" | "xp" => Ok(Collection::StudentXp),
            "feedback" => Ok(Collection::Feedback),
            "attendance_logs" => Ok(Collection::AttendanceLogs),
            "stu" | "student_attendance" => Ok(Collection::StudentAttendance),
            other => Err(format!("unknown collection '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// Filter/order/limit description shared by every store backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.into(), value.into()));
        self
    }

    pub fn is_in(mut self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.filters.push(Filter::In(column.into(), values));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(OrderBy { column: column.into(), descending });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.filters
            .iter()
            .map(|f| match f {
                Filter::Eq(c, _) | Filter::In(c, _) => c.as_str(),
            })
            .chain(self.order_by.iter().map(|o| o.column.as_str()))
    }

    /// Evaluate the filters against a single row
    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|filter| match filter {
            Filter::Eq(column, expected) => row.get(column).is_some_and(|v| values_equal(v, expected)),
            Filter::In(column, candidates) => row
                .get(column)
                .is_some_and(|v| candidates.iter().any(|c| values_equal(v, c))),
        })
    }
}

/// How the store reports the effect of an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAck {
    /// The backend knows how many rows changed
    Rows(u64),
    /// The backend accepted the call but cannot say what it touched
    Unknown,
}

/// Generic row store keyed by one unique column per collection.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    async fn select(&self, collection: Collection, query: &Query) -> Result<Vec<Row>, StoreError>;

    async fn get(&self, collection: Collection, key: &Value) -> Result<Option<Row>, StoreError> {
        let query = Query::new().eq(collection.key_column(), key.clone()).limit(1);
        Ok(self.select(collection, &query).await?.into_iter().next())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Row>, StoreError> {
        self.select(collection, &Query::new()).await
    }

    /// Plain insert; a duplicate key is a `StoreError::Conflict`
    async fn insert(&self, collection: Collection, rows: Vec<Row>) -> Result<Vec<Row>, StoreError>;

    /// Insert, or overwrite the supplied columns of the row with the same key
    async fn upsert(&self, collection: Collection, row: Row) -> Result<Row, StoreError>;

    async fn update(&self, collection: Collection, key: &Value, patch: Row) -> Result<UpdateAck, StoreError>;

    /// Delete every row whose key is in `keys`, returning how many went away
    async fn delete(&self, collection: Collection, keys: &[Value]) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Column names reach SQL as quoted identifiers; keep them to a plain alphabet anyway.
pub fn is_valid_column(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ' || c == '-')
        && !name.starts_with(' ')
        && !name.ends_with(' ')
}

pub fn validate_columns<'a>(columns: impl IntoIterator<Item = &'a str>) -> Result<(), StoreError> {
    for column in columns {
        if !is_valid_column(column) {
            return Err(StoreError::InvalidColumn(column.to_string()));
        }
    }
    Ok(())
}

/// JSON equality where 1 and 1.0 are the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Ordering used for in-memory sorts; nulls and missing values sort last
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .unwrap_or_default()
            .partial_cmp(&y.as_f64().unwrap_or_default())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
