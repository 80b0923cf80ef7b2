//! Row sets to bounded merge statements. Every writer describes its target once, as a table,
//! a conflict key and the columns it owns, and hands rows to [`upsert_rows`]. Each batch is
//! its own statement: a failing batch leaves earlier batches committed.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use mockall::automock;
use sqlx::{postgres::PgArguments, query::Query, PgPool, Postgres};
use tracing::debug;

use crate::{beacon_chain::Day, config::POSTGRES_MAX_BIND_PARAMS, units::GweiNewtype};

use super::{workers::WorkerGroup, StatsError};

#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Int4(i32),
    Int8(i64),
    Numeric(BigDecimal),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Int4(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int8(value)
    }
}

impl From<Day> for SqlValue {
    fn from(Day(day): Day) -> Self {
        Self::Int4(day)
    }
}

impl From<GweiNewtype> for SqlValue {
    fn from(GweiNewtype(gwei): GweiNewtype) -> Self {
        Self::Int8(gwei)
    }
}

impl From<BigDecimal> for SqlValue {
    fn from(value: BigDecimal) -> Self {
        Self::Numeric(value)
    }
}

/// A fixed width row. Values line up with the columns of the target it is written to.
pub trait UpsertRow {
    fn values(&self) -> Vec<SqlValue>;
}

#[derive(Clone, Copy, Debug)]
pub struct UpsertTarget {
    pub table: &'static str,
    pub conflict_key: &'static [&'static str],
    /// Every column of the row, conflict key columns included.
    pub columns: &'static [&'static str],
}

impl UpsertTarget {
    pub const fn new(
        table: &'static str,
        conflict_key: &'static [&'static str],
        columns: &'static [&'static str],
    ) -> Self {
        Self {
            table,
            conflict_key,
            columns,
        }
    }

    /// Largest batch that keeps a statement under the bind parameter ceiling.
    pub fn max_batch_size(&self) -> usize {
        (POSTGRES_MAX_BIND_PARAMS / self.columns.len().max(1)).max(1)
    }

    pub fn clamp_batch_size(&self, batch_size: usize) -> usize {
        batch_size.clamp(1, self.max_batch_size())
    }
}

/// `INSERT .. VALUES ($1, $2), ($3, $4) ON CONFLICT (key) DO UPDATE SET col = excluded.col`
/// for `row_count` rows. Only the non key columns are updated on conflict, columns other
/// writers own stay untouched.
pub fn build_upsert_sql(target: &UpsertTarget, row_count: usize) -> String {
    let width = target.columns.len();

    let placeholders = (0..row_count)
        .map(|row| {
            let params = (1..=width)
                .map(|column| format!("${}", row * width + column))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({params})")
        })
        .collect::<Vec<_>>()
        .join(", ");

    let updates = target
        .columns
        .iter()
        .filter(|column| !target.conflict_key.contains(column))
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ");

    let conflict_action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {updates}")
    };

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) {}",
        target.table,
        target.columns.join(", "),
        placeholders,
        target.conflict_key.join(", "),
        conflict_action
    )
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpsertBatch {
    pub sql: String,
    pub row_count: usize,
    pub values: Vec<SqlValue>,
}

impl UpsertBatch {
    fn query(&self) -> Query<'_, Postgres, PgArguments> {
        self.values
            .iter()
            .fold(sqlx::query(&self.sql), |query, value| match value {
                SqlValue::Int4(value) => query.bind(*value),
                SqlValue::Int8(value) => query.bind(*value),
                SqlValue::Numeric(value) => query.bind(value),
                SqlValue::Text(value) => query.bind(value.as_str()),
                SqlValue::Timestamp(value) => query.bind(*value),
            })
    }
}

/// Splits rows into batches of at most `batch_size` rows, clamped to what fits the bind
/// parameter ceiling.
pub fn plan_batches<R: UpsertRow>(
    target: &UpsertTarget,
    rows: &[R],
    batch_size: usize,
) -> Result<Vec<UpsertBatch>, StatsError> {
    let batch_size = target.clamp_batch_size(batch_size);
    let width = target.columns.len();

    rows.chunks(batch_size)
        .map(|chunk| {
            let mut values = Vec::with_capacity(chunk.len() * width);
            for row in chunk {
                let row_values = row.values();
                if row_values.len() != width {
                    return Err(StatsError::UnexpectedValue {
                        what: "row width",
                        value: row_values.len().to_string(),
                        context: format!("{} expects {} columns", target.table, width),
                    });
                }
                values.extend(row_values);
            }

            Ok(UpsertBatch {
                sql: build_upsert_sql(target, chunk.len()),
                row_count: chunk.len(),
                values,
            })
        })
        .collect()
}

#[automock]
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Executes one batch as its own statement.
    async fn execute_batch(&self, batch: UpsertBatch) -> sqlx::Result<u64>;
    /// Executes all batches in one transaction, all or nothing.
    async fn execute_batches_atomically(&self, batches: Vec<UpsertBatch>) -> sqlx::Result<u64>;
}

#[async_trait]
impl BatchWriter for PgPool {
    async fn execute_batch(&self, batch: UpsertBatch) -> sqlx::Result<u64> {
        let result = batch.query().execute(self).await?;
        Ok(result.rows_affected())
    }

    async fn execute_batches_atomically(&self, batches: Vec<UpsertBatch>) -> sqlx::Result<u64> {
        let mut transaction = self.begin().await?;
        let mut rows_affected = 0;
        for batch in &batches {
            rows_affected += batch.query().execute(&mut *transaction).await?.rows_affected();
        }
        transaction.commit().await?;
        Ok(rows_affected)
    }
}

/// Writes rows in independent batches through the worker group. Returns the number of rows
/// written.
pub async fn upsert_rows<R: UpsertRow>(
    writer: &dyn BatchWriter,
    group: &WorkerGroup,
    target: &UpsertTarget,
    rows: &[R],
    batch_size: usize,
) -> Result<u64, StatsError> {
    let batches = plan_batches(target, rows, batch_size)?;
    debug!(
        table = target.table,
        rows = rows.len(),
        batches = batches.len(),
        "upserting rows"
    );

    let written = group
        .run(batches, |batch| async move {
            let row_count = batch.row_count as u64;
            writer.execute_batch(batch).await?;
            Ok(row_count)
        })
        .await?;

    Ok(written.into_iter().sum())
}

/// Writes rows in batches inside a single transaction.
pub async fn upsert_rows_atomically<R: UpsertRow>(
    writer: &dyn BatchWriter,
    target: &UpsertTarget,
    rows: &[R],
    batch_size: usize,
) -> Result<u64, StatsError> {
    let batches = plan_batches(target, rows, batch_size)?;
    if batches.is_empty() {
        return Ok(0);
    }

    debug!(
        table = target.table,
        rows = rows.len(),
        batches = batches.len(),
        "upserting rows in one transaction"
    );

    writer.execute_batches_atomically(batches).await?;
    Ok(rows.len() as u64)
}
