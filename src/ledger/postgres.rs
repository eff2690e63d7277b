//! PostgreSQL implementation of the ledger store.
//!
//! Ids are `uuid`, so keys that are not UUIDs are rejected before reaching
//! the database. `modified_at` is maintained by the `update_modified_at`
//! trigger installed by the migration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, PostgresQueryBuilder, Query};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query as SqlxQuery;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::schema::{DbChangeLog, RECORD_COLUMNS};
use super::{
    map_insert_error, LedgerError, LedgerRecord, LedgerStatus, LedgerStore, NewLedgerRecord,
    Result,
};
use crate::message::Statement;

/// PostgreSQL implementation of LedgerStore.
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Create a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool, shared with the statements being applied.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded ledger migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/postgres")
            .run(&self.pool)
            .await?;
        info!("Ledger schema migrated (PostgreSQL)");
        Ok(())
    }

    async fn fetch_record(&self, query: &str) -> Result<Option<LedgerRecord>> {
        let row = sqlx::query(query).fetch_optional(&self.pool).await?;
        row.as_ref().map(record_from_row).transpose()
    }
}

fn parse_key(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| LedgerError::InvalidKey(id.to_string()))
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn find(
        &self,
        id: &str,
        topic: &str,
        ingression_ts: i64,
    ) -> Result<Option<LedgerRecord>> {
        let id = parse_key(id)?;
        let query = Query::select()
            .columns(RECORD_COLUMNS)
            .from(DbChangeLog::Table)
            .and_where(Expr::col(DbChangeLog::Id).eq(id.to_string()))
            .and_where(Expr::col(DbChangeLog::Topic).eq(topic))
            .and_where(Expr::col(DbChangeLog::IngressionTs).eq(ingression_ts))
            .to_string(PostgresQueryBuilder);

        self.fetch_record(&query).await
    }

    async fn get(&self, id: &str) -> Result<Option<LedgerRecord>> {
        let id = parse_key(id)?;
        let query = Query::select()
            .columns(RECORD_COLUMNS)
            .from(DbChangeLog::Table)
            .and_where(Expr::col(DbChangeLog::Id).eq(id.to_string()))
            .to_string(PostgresQueryBuilder);

        self.fetch_record(&query).await
    }

    async fn insert(&self, record: &NewLedgerRecord) -> Result<()> {
        let id = parse_key(&record.id)?;
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
                id.to_string().into(),
                record.topic.clone().into(),
                record.ingression_ts.into(),
                record.headers.to_string().into(),
                record.message.to_string().into(),
                LedgerStatus::Pending.as_str().into(),
            ])
            .to_string(PostgresQueryBuilder);

        sqlx::query(&insert)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(&record.id, e))?;

        debug!(id = %record.id, topic = %record.topic, "Ledger record inserted");
        Ok(())
    }

    async fn apply(&self, id: &str, statement: &Statement) -> Result<u64> {
        let key = parse_key(id)?;
        let mut tx = self.pool.begin().await?;

        let result = bind_values(sqlx::query(&statement.text), &statement.values)
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Mutation(e.to_string()))?;

        let update = Query::update()
            .table(DbChangeLog::Table)
            .value(DbChangeLog::Status, LedgerStatus::Success.as_str())
            .and_where(Expr::col(DbChangeLog::Id).eq(key.to_string()))
            .to_string(PostgresQueryBuilder);

        let updated = sqlx::query(&update).execute(&mut *tx).await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::NotFound { id: id.to_string() });
        }

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn set_status(&self, id: &str, status: LedgerStatus) -> Result<()> {
        let key = parse_key(id)?;
        let update = Query::update()
            .table(DbChangeLog::Table)
            .value(DbChangeLog::Status, status.as_str())
            .and_where(Expr::col(DbChangeLog::Id).eq(key.to_string()))
            .to_string(PostgresQueryBuilder);

        let updated = sqlx::query(&update).execute(&self.pool).await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::NotFound { id: id.to_string() });
        }
        Ok(())
    }
}

/// Bind JSON values positionally with their natural PostgreSQL types.
///
/// Strings bind as `text`, integers as `int8`, floats as `float8`, arrays and
/// objects as `json`.
fn bind_values<'q>(
    mut query: SqlxQuery<'q, Postgres, PgArguments>,
    values: &'q [Value],
) -> SqlxQuery<'q, Postgres, PgArguments> {
    for value in values {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s.as_str()),
            Value::Array(_) | Value::Object(_) => query.bind(sqlx::types::Json(value)),
        };
    }
    query
}

fn record_from_row(row: &PgRow) -> Result<LedgerRecord> {
    let id: Uuid = row.try_get("id")?;
    let status: String = row.try_get("status")?;

    Ok(LedgerRecord {
        id: id.to_string(),
        topic: row.try_get("topic")?,
        ingression_ts: row.try_get("ingression_ts")?,
        headers: row.try_get("headers")?,
        message: row.try_get("message")?,
        status: status.parse()?,
        created_at: row.try_get::<Option<DateTime<Utc>>, _>("created_at")?,
        modified_at: row.try_get::<Option<DateTime<Utc>>, _>("modified_at")?,
    })
}
