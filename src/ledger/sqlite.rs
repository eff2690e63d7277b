//! SQLite implementation of the ledger store.
//!
//! Ids are TEXT (any non-empty key is accepted), JSON columns are TEXT and
//! timestamps are RFC 3339 strings maintained by the schema and its trigger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Query, SqliteQueryBuilder};
use serde_json::Value;
use sqlx::query::Query as SqlxQuery;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use super::schema::{DbChangeLog, RECORD_COLUMNS};
use super::{
    map_insert_error, LedgerError, LedgerRecord, LedgerStatus, LedgerStore, NewLedgerRecord,
    Result,
};
use crate::message::Statement;

/// SQLite implementation of LedgerStore.
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Create a new SQLite ledger store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying pool, shared with the statements being applied.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run the embedded ledger migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite").run(&self.pool).await?;
        info!("Ledger schema migrated (SQLite)");
        Ok(())
    }

    async fn fetch_record(&self, query: &str) -> Result<Option<LedgerRecord>> {
        let row = sqlx::query(query).fetch_optional(&self.pool).await?;
        row.as_ref().map(record_from_row).transpose()
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn find(
        &self,
        id: &str,
        topic: &str,
        ingression_ts: i64,
    ) -> Result<Option<LedgerRecord>> {
        let query = Query::select()
            .columns(RECORD_COLUMNS)
            .from(DbChangeLog::Table)
            .and_where(Expr::col(DbChangeLog::Id).eq(id))
            .and_where(Expr::col(DbChangeLog::Topic).eq(topic))
            .and_where(Expr::col(DbChangeLog::IngressionTs).eq(ingression_ts))
            .to_string(SqliteQueryBuilder);

        self.fetch_record(&query).await
    }

    async fn get(&self, id: &str) -> Result<Option<LedgerRecord>> {
        let query = Query::select()
            .columns(RECORD_COLUMNS)
            .from(DbChangeLog::Table)
            .and_where(Expr::col(DbChangeLog::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        self.fetch_record(&query).await
    }

    async fn insert(&self, record: &NewLedgerRecord) -> Result<()> {
        let insert = Query::insert()
            .into_table(DbChangeLog::Table)
            .columns([
                DbChangeLog::Id,
                DbChangeLog::Topic,
                DbChangeLog::IngressionTs,
                DbChangeLog::Headers,
                DbChangeLog::Message,
                DbChangeLog::Status,
            ])
            .values_panic([
                record.id.clone().into(),
                record.topic.clone().into(),
                record.ingression_ts.into(),
                record.headers.to_string().into(),
                record.message.to_string().into(),
                LedgerStatus::Pending.as_str().into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&insert)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(&record.id, e))?;

        debug!(id = %record.id, topic = %record.topic, "Ledger record inserted");
        Ok(())
    }

    async fn apply(&self, id: &str, statement: &Statement) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = bind_values(sqlx::query(&statement.text), &statement.values)
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Mutation(e.to_string()))?;

        let update = Query::update()
            .table(DbChangeLog::Table)
            .value(DbChangeLog::Status, LedgerStatus::Success.as_str())
            .and_where(Expr::col(DbChangeLog::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let updated = sqlx::query(&update).execute(&mut *tx).await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::NotFound { id: id.to_string() });
        }

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn set_status(&self, id: &str, status: LedgerStatus) -> Result<()> {
        let update = Query::update()
            .table(DbChangeLog::Table)
            .value(DbChangeLog::Status, status.as_str())
            .and_where(Expr::col(DbChangeLog::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let updated = sqlx::query(&update).execute(&self.pool).await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::NotFound { id: id.to_string() });
        }
        Ok(())
    }
}

/// Bind JSON values positionally.
///
/// Arrays and objects are bound as their JSON text.
fn bind_values<'q>(
    mut query: SqlxQuery<'q, Sqlite, SqliteArguments<'q>>,
    values: &'q [Value],
) -> SqlxQuery<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s.as_str()),
            Value::Array(_) | Value::Object(_) => query.bind(value.to_string()),
        };
    }
    query
}

fn record_from_row(row: &SqliteRow) -> Result<LedgerRecord> {
    let headers: String = row.try_get("headers")?;
    let message: String = row.try_get("message")?;
    let status: String = row.try_get("status")?;

    Ok(LedgerRecord {
        id: row.try_get("id")?,
        topic: row.try_get("topic")?,
        ingression_ts: row.try_get("ingression_ts")?,
        headers: serde_json::from_str(&headers)?,
        message: serde_json::from_str(&message)?,
        status: status.parse()?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
        modified_at: parse_timestamp(row.try_get("modified_at")?)?,
    })
}

fn parse_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| LedgerError::InvalidTimestamp(format!("{}: {}", s, e)))
    })
    .transpose()
}
