use tracing::{info, instrument};

use crate::{
    beacon_chain::{Day, ValidatorIndex},
    indexer::SyncDutyStatistic,
};

use super::{
    ensure_day_finalized, stats_target,
    status::{self, Category},
    upsert::{self, SqlValue, UpsertRow, UpsertTarget},
    ExportContext, StatsError,
};

const TARGET: UpsertTarget = stats_target(&[
    "validatorindex",
    "day",
    "participated_sync",
    "missed_sync",
    "orphaned_sync",
]);

struct SyncDutiesRow {
    index: ValidatorIndex,
    day: Day,
    participated_sync: i32,
    missed_sync: i32,
    orphaned_sync: i32,
}

impl SyncDutiesRow {
    fn new(day: Day, statistic: &SyncDutyStatistic) -> Self {
        Self {
            index: statistic.index,
            day,
            participated_sync: statistic.participated_sync,
            missed_sync: statistic.missed_sync,
            orphaned_sync: statistic.orphaned_sync,
        }
    }
}

impl UpsertRow for SyncDutiesRow {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.index.into(),
            self.day.into(),
            self.participated_sync.into(),
            self.missed_sync.into(),
            self.orphaned_sync.into(),
        ]
    }
}

/// Few validators sit in a sync committee on any day, their rows go out in one transaction.
#[instrument(skip_all, fields(day = %day))]
pub async fn write_sync_duties(ctx: &ExportContext<'_>, day: Day) -> Result<(), StatsError> {
    ensure_day_finalized(&ctx.db.reader, day).await?;

    let statistics = ctx
        .indexer
        .sync_duty_statistics(day.epoch_range())
        .await
        .map_err(StatsError::Aggregation)?;

    let rows: Vec<SyncDutiesRow> = statistics
        .iter()
        .map(|statistic| SyncDutiesRow::new(day, statistic))
        .collect();

    let written = upsert::upsert_rows_atomically(
        ctx.batch_writer(),
        &TARGET,
        &rows,
        ctx.config.sync_duties_batch_size,
    )
    .await?;

    status::mark_category_exported(&ctx.db.writer, day, Category::SyncDuties).await?;

    info!(validators = written, "exported sync duties");

    Ok(())
}
