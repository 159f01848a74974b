use anyhow::{Context, Result};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Executor, PgPool, Row};

use crate::source::{QuerySource, SourceRow};

/// Query adapter for the primary relational store.
///
/// Every session is forced read-only at the server, so a write statement that
/// slips past pattern screening still fails at the database. Connect this
/// pool with dedicated read-only credentials where available; the session
/// setting is the second layer, not a substitute.
#[derive(Debug, Clone)]
pub struct ReadOnlyPgSource {
    pool: PgPool,
}

impl ReadOnlyPgSource {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("SET default_transaction_read_only = on").await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await
            .context("Failed to create read-only PostgreSQL pool")?;
        Ok(Self { pool })
    }
}

/// Decode one column into JSON without knowing the schema up front. Timestamps
/// serialize as RFC 3339 and dates as ISO 8601 so output is deterministic.
fn decode_column(row: &PgRow, index: usize) -> serde_json::Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map(serde_json::Value::from).unwrap_or_default();
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map(serde_json::Value::from).unwrap_or_default();
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return value.map(serde_json::Value::from).unwrap_or_default();
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map(serde_json::Value::from).unwrap_or_default();
    }
    if let Ok(value) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
        return value
            .map(|v| serde_json::Value::String(v.to_rfc3339()))
            .unwrap_or_default();
    }
    if let Ok(value) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return value
            .map(|v| serde_json::Value::String(v.format("%Y-%m-%dT%H:%M:%S").to_string()))
            .unwrap_or_default();
    }
    if let Ok(value) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return value
            .map(|v| serde_json::Value::String(v.format("%Y-%m-%d").to_string()))
            .unwrap_or_default();
    }
    if let Ok(value) = row.try_get::<Option<uuid::Uuid>, _>(index) {
        return value
            .map(|v| serde_json::Value::String(v.to_string()))
            .unwrap_or_default();
    }
    if let Ok(value) = row.try_get::<Option<serde_json::Value>, _>(index) {
        return value.unwrap_or_default();
    }
    serde_json::Value::Null
}

fn row_to_json(row: &PgRow) -> SourceRow {
    let mut out = SourceRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_column(row, index));
    }
    out
}

#[async_trait::async_trait]
impl QuerySource for ReadOnlyPgSource {
    async fn execute_read(&self, sql: &str, binds: &[serde_json::Value]) -> Result<Vec<SourceRow>> {
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = match bind {
                serde_json::Value::Null => query.bind(Option::<String>::None),
                serde_json::Value::Bool(b) => query.bind(*b),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        query.bind(i)
                    } else {
                        query.bind(n.as_f64().unwrap_or(0.0))
                    }
                }
                serde_json::Value::String(s) => query.bind(s.clone()),
                // Arrays and objects bind as jsonb
                other => query.bind(other.clone()),
            };
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Read query failed")?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}
