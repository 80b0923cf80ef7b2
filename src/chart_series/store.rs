use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};

use crate::{
    beacon_chain::Day,
    validator_stats::upsert::{SqlValue, UpsertRow, UpsertTarget},
};

use super::indicators::Indicator;

pub const CHART_SERIES_TARGET: UpsertTarget = UpsertTarget::new(
    "chart_series",
    &["time", "indicator"],
    &["time", "indicator", "value"],
);

#[derive(Clone, Debug, PartialEq)]
pub struct ChartSeriesPoint {
    pub time: DateTime<Utc>,
    pub indicator: Indicator,
    pub value: BigDecimal,
}

impl UpsertRow for ChartSeriesPoint {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Timestamp(self.time),
            SqlValue::Text(self.indicator.to_string()),
            SqlValue::Numeric(self.value.clone()),
        ]
    }
}

pub struct ChartSeriesStore<'a> {
    db_pool: &'a PgPool,
}

impl<'a> ChartSeriesStore<'a> {
    pub fn new(db_pool: &'a PgPool) -> Self {
        Self { db_pool }
    }

    /// Total emission of the most recent day before `time`, zero when nothing is stored yet.
    pub async fn last_total_emission(&self, time: DateTime<Utc>) -> sqlx::Result<BigDecimal> {
        let value = sqlx::query_scalar::<Postgres, BigDecimal>(
            "
            SELECT value
            FROM chart_series
            WHERE indicator = $1
            AND time < $2
            ORDER BY time DESC
            LIMIT 1
            ",
        )
        .bind(Indicator::TotalEmission.as_str())
        .bind(time)
        .fetch_optional(self.db_pool)
        .await?;

        Ok(value.unwrap_or_else(BigDecimal::zero))
    }

    pub async fn mark_day_exported(&self, day: Day) -> sqlx::Result<()> {
        sqlx::query(
            "
            INSERT INTO chart_series_status (day, status)
            VALUES ($1, TRUE)
            ON CONFLICT (day) DO UPDATE SET
                status = excluded.status
            ",
        )
        .bind(day)
        .execute(self.db_pool)
        .await?;

        Ok(())
    }

    pub async fn is_day_exported(&self, day: Day) -> sqlx::Result<bool> {
        sqlx::query_scalar::<Postgres, bool>(
            "
            SELECT EXISTS (
                SELECT 1 FROM chart_series_status WHERE day = $1 AND status
            )
            ",
        )
        .bind(day)
        .fetch_one(self.db_pool)
        .await
    }
}
