//! PostgreSQL database backend.
//!
//! Wraps a sqlx pool created on first use. Every query checks a connection out
//! of the pool and returns it as soon as the rows are materialized.

use super::{Database, Dialect, QueryResult, Value};
use crate::config::DatabaseSettings;
use crate::error::{DavinciError, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};
use tokio::sync::OnceCell;
use tracing::info;

/// PostgreSQL-backed database.
pub struct PostgresDatabase {
    options: PgConnectOptions,
    max_connections: u32,
    pool: OnceCell<PgPool>,
}

impl PostgresDatabase {
    /// Prepare the connection options without opening a connection.
    ///
    /// The pool itself is built inside the async runtime on the first query.
    pub fn connect_lazy(settings: &DatabaseSettings) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.name);

        info!(
            "Configured PostgreSQL database {}@{}:{}/{}",
            settings.user, settings.host, settings.port, settings.name
        );

        Ok(Self {
            options,
            max_connections: settings.max_connections,
            pool: OnceCell::new(),
        })
    }

    async fn pool(&self) -> &PgPool {
        self.pool
            .get_or_init(|| async {
                PgPoolOptions::new()
                    .max_connections(self.max_connections)
                    .connect_lazy_with(self.options.clone())
            })
            .await
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}

/// How a PostgreSQL column is turned into a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
}

impl ColumnKind {
    fn from_type_name(name: &str) -> Option<Self> {
        let kind = match name {
            "BOOL" => ColumnKind::Bool,
            "INT2" => ColumnKind::Int2,
            "INT4" => ColumnKind::Int4,
            "INT8" => ColumnKind::Int8,
            "FLOAT4" => ColumnKind::Float4,
            "FLOAT8" => ColumnKind::Float8,
            "NUMERIC" => ColumnKind::Numeric,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" | "UNKNOWN" => ColumnKind::Text,
            "DATE" => ColumnKind::Date,
            "TIME" => ColumnKind::Time,
            "TIMESTAMP" => ColumnKind::Timestamp,
            "TIMESTAMPTZ" => ColumnKind::TimestampTz,
            "UUID" => ColumnKind::Uuid,
            "JSON" | "JSONB" => ColumnKind::Json,
            _ => return None,
        };
        Some(kind)
    }
}

/// Decode one column by its PostgreSQL type name.
///
/// Temporal, UUID and JSON values are rendered as text. Types without a
/// decoder are an error rather than raw wire bytes.
fn decode_column(row: &PgRow, index: usize) -> Result<Value> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let column = row.column(index);
    let type_name = column.type_info().name();
    let kind = ColumnKind::from_type_name(type_name).ok_or_else(|| {
        DavinciError::Database(format!(
            "Unsupported column type {} for column {}; cast it to text in the query",
            type_name,
            column.name()
        ))
    })?;

    let value = match kind {
        ColumnKind::Bool => Value::Bool(row.try_get(index)?),
        ColumnKind::Int2 => Value::Int(row.try_get::<i16, _>(index)? as i64),
        ColumnKind::Int4 => Value::Int(row.try_get::<i32, _>(index)? as i64),
        ColumnKind::Int8 => Value::Int(row.try_get(index)?),
        ColumnKind::Float4 => Value::Float(row.try_get::<f32, _>(index)? as f64),
        ColumnKind::Float8 => Value::Float(row.try_get(index)?),
        ColumnKind::Numeric => {
            let decimal: sqlx::types::BigDecimal = row.try_get(index)?;
            let text = decimal.to_string();
            text.parse::<f64>().map(Value::Float).unwrap_or(Value::Text(text))
        }
        ColumnKind::Text => Value::Text(row.try_get(index)?),
        ColumnKind::Date => Value::Text(row.try_get::<NaiveDate, _>(index)?.to_string()),
        ColumnKind::Time => Value::Text(row.try_get::<NaiveTime, _>(index)?.to_string()),
        ColumnKind::Timestamp => Value::Text(row.try_get::<NaiveDateTime, _>(index)?.to_string()),
        ColumnKind::TimestampTz => {
            let instant: DateTime<Utc> = row.try_get(index)?;
            Value::Text(instant.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string())
        }
        ColumnKind::Uuid => Value::Text(row.try_get::<sqlx::types::Uuid, _>(index)?.to_string()),
        ColumnKind::Json => {
            let json: serde_json::Value = row.try_get(index)?;
            Value::Text(json.to_string())
        }
    };

    Ok(value)
}

#[async_trait]
impl Database for PostgresDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(self.pool().await)
            .await?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut result = QueryResult {
            columns,
            rows: Vec::with_capacity(rows.len()),
        };

        for row in &rows {
            let values = (0..row.len())
                .map(|i| decode_column(row, i))
                .collect::<Result<Vec<_>>>()?;
            result.rows.push(values);
        }

        Ok(result)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(self.pool().await).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_column_kinds() {
        assert_eq!(ColumnKind::from_type_name("DATE"), Some(ColumnKind::Date));
        assert_eq!(ColumnKind::from_type_name("TIMESTAMPTZ"), Some(ColumnKind::TimestampTz));
        assert_eq!(ColumnKind::from_type_name("JSONB"), Some(ColumnKind::Json));
        assert_eq!(ColumnKind::from_type_name("UUID"), Some(ColumnKind::Uuid));
        assert_eq!(ColumnKind::from_type_name("BPCHAR"), Some(ColumnKind::Text));
        assert_eq!(ColumnKind::from_type_name("INTERVAL"), None);
        assert_eq!(ColumnKind::from_type_name("BYTEA"), None);
        assert_eq!(ColumnKind::from_type_name("INT4[]"), None);
    }

    /// Runs against a live server when `DAVINCI_TEST_DATABASE_URL` is set.
    fn live_database() -> Option<PostgresDatabase> {
        let url = std::env::var("DAVINCI_TEST_DATABASE_URL").ok()?;
        Some(PostgresDatabase {
            options: PgConnectOptions::from_str(&url).unwrap(),
            max_connections: 1,
            pool: OnceCell::new(),
        })
    }

    #[tokio::test]
    async fn test_decode_non_text_columns() {
        let Some(db) = live_database() else {
            return;
        };

        let rendered = crate::tools::database::query_database(
            &db,
            "SELECT DATE '2021-05-01' AS d, TIMESTAMP '2021-05-01 10:00:00' AS t, \
             TIMESTAMPTZ '2021-05-01 10:00:00+00' AS tz, '{\"a\":1}'::jsonb AS j, \
             '6f1c2a8e-3b7d-4c5e-9a10-2b3c4d5e6f70'::uuid AS u",
        )
        .await
        .unwrap();
        let line = rendered.lines().last().unwrap();
        assert_eq!(
            line,
            "2021-05-01, 2021-05-01 10:00:00, 2021-05-01 10:00:00+00:00, {\"a\":1}, \
             6f1c2a8e-3b7d-4c5e-9a10-2b3c4d5e6f70"
        );

        let interval = db.fetch_all("SELECT INTERVAL '1 day' AS i", &[]).await;
        assert!(matches!(interval, Err(DavinciError::Database(_))));
    }
}
