use tracing::{info, instrument};

use crate::{beacon_chain::Day, indexer::BalanceStatistic};

use super::{
    ensure_day_finalized, stats_target,
    status::{self, Category},
    upsert::{self, SqlValue, UpsertRow, UpsertTarget},
    ExportContext, StatsError,
};

const TARGET: UpsertTarget = stats_target(&[
    "validatorindex",
    "day",
    "min_balance",
    "max_balance",
    "min_effective_balance",
    "max_effective_balance",
    "start_balance",
    "start_effective_balance",
    "end_balance",
    "end_effective_balance",
]);

struct BalancesRow<'a> {
    day: Day,
    statistic: &'a BalanceStatistic,
}

impl UpsertRow for BalancesRow<'_> {
    fn values(&self) -> Vec<SqlValue> {
        let statistic = self.statistic;
        vec![
            statistic.index.into(),
            self.day.into(),
            statistic.min_balance.into(),
            statistic.max_balance.into(),
            statistic.min_effective_balance.into(),
            statistic.max_effective_balance.into(),
            statistic.start_balance.into(),
            statistic.start_effective_balance.into(),
            statistic.end_balance.into(),
            statistic.end_effective_balance.into(),
        ]
    }
}

#[instrument(skip_all, fields(day = %day))]
pub async fn write_balances(ctx: &ExportContext<'_>, day: Day) -> Result<(), StatsError> {
    ensure_day_finalized(&ctx.db.reader, day).await?;

    let statistics = ctx
        .indexer
        .balance_statistics(day.epoch_range())
        .await
        .map_err(StatsError::Aggregation)?;

    let rows: Vec<BalancesRow> = statistics
        .iter()
        .map(|statistic| BalancesRow { day, statistic })
        .collect();

    let group = ctx.worker_group("balances");
    let written = upsert::upsert_rows(
        ctx.batch_writer(),
        &group,
        &TARGET,
        &rows,
        ctx.config.upsert_batch_size,
    )
    .await?;

    status::mark_category_exported(&ctx.db.writer, day, Category::Balance).await?;

    info!(validators = written, "exported balances");

    Ok(())
}
