use tracing::{info, instrument};

use crate::beacon_chain::Day;

use super::{
    ensure_day_finalized,
    ledger::{self, BlockCounts, Slashings},
    stats_target,
    status::{self, Category},
    upsert::{self, SqlValue, UpsertRow, UpsertTarget},
    ExportContext, StatsError,
};

const BLOCK_COUNTS_TARGET: UpsertTarget = stats_target(&[
    "validatorindex",
    "day",
    "proposed_blocks",
    "missed_blocks",
    "orphaned_blocks",
]);

const SLASHINGS_TARGET: UpsertTarget = stats_target(&[
    "validatorindex",
    "day",
    "attester_slashings",
    "proposer_slashings",
]);

struct Dated<'a, T> {
    day: Day,
    inner: &'a T,
}

impl UpsertRow for Dated<'_, BlockCounts> {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.inner.proposer.into(),
            self.day.into(),
            self.inner.proposed_blocks.into(),
            self.inner.missed_blocks.into(),
            self.inner.orphaned_blocks.into(),
        ]
    }
}

impl UpsertRow for Dated<'_, Slashings> {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.inner.proposer.into(),
            self.day.into(),
            self.inner.attester_slashings.into(),
            self.inner.proposer_slashings.into(),
        ]
    }
}

fn dated<T>(day: Day, items: &[T]) -> Vec<Dated<'_, T>> {
    items.iter().map(|inner| Dated { day, inner }).collect()
}

#[instrument(skip_all, fields(day = %day))]
pub async fn write_block_stats(ctx: &ExportContext<'_>, day: Day) -> Result<(), StatsError> {
    let range = day.epoch_range();
    ensure_day_finalized(&ctx.db.reader, day).await?;

    let (block_counts, slashings) = futures::try_join!(
        ledger::block_counts_by_proposer(&ctx.db.reader, &range),
        ledger::slashings_by_proposer(&ctx.db.reader, &range),
    )?;

    let group = ctx.worker_group("block_stats");
    let proposers = upsert::upsert_rows(
        ctx.batch_writer(),
        &group,
        &BLOCK_COUNTS_TARGET,
        &dated(day, &block_counts),
        ctx.config.upsert_batch_size,
    )
    .await?;
    let slashers = upsert::upsert_rows(
        ctx.batch_writer(),
        &group,
        &SLASHINGS_TARGET,
        &dated(day, &slashings),
        ctx.config.upsert_batch_size,
    )
    .await?;

    status::mark_category_exported(&ctx.db.writer, day, Category::BlockStats).await?;

    info!(proposers, slashers, "exported block stats");

    Ok(())
}

#[cfg(test)]
mod tests {
    use test_context::test_context;

    use super::*;
    use crate::{
        beacon_chain::{EPOCHS_PER_DAY, SLOTS_PER_EPOCH},
        db::tests::TestDb,
        validator_stats::{
            ledger::tests::store_block,
            status::get_status,
            tests::{finalize_days, stats_column_i64, TestCollaborators},
        },
    };

    #[test_context(TestDb)]
    #[tokio::test]
    async fn write_block_stats_test(test_db: &TestDb) {
        let pool = &test_db.pool;
        finalize_days(pool, Day(1), Day(1)).await;

        let first_slot = EPOCHS_PER_DAY * SLOTS_PER_EPOCH;
        store_block(pool, first_slot, 7, "1", Some(100), 2, 1).await;
        store_block(pool, first_slot + 1, 7, "2", None, 0, 0).await;
        store_block(pool, first_slot + 2, 7, "3", None, 4, 4).await;
        store_block(pool, first_slot + 3, 8, "1", Some(101), 0, 0).await;
        // Belongs to day 0.
        store_block(pool, first_slot - 1, 7, "1", Some(99), 0, 0).await;

        let collaborators = TestCollaborators::new(test_db.pools());
        write_block_stats(&collaborators.context(), Day(1))
            .await
            .unwrap();

        assert_eq!(stats_column_i64(pool, "proposed_blocks", 7, Day(1)).await, Some(1));
        assert_eq!(stats_column_i64(pool, "missed_blocks", 7, Day(1)).await, Some(1));
        assert_eq!(stats_column_i64(pool, "orphaned_blocks", 7, Day(1)).await, Some(1));
        assert_eq!(stats_column_i64(pool, "attester_slashings", 7, Day(1)).await, Some(2));
        assert_eq!(stats_column_i64(pool, "proposer_slashings", 7, Day(1)).await, Some(1));
        assert_eq!(stats_column_i64(pool, "proposed_blocks", 8, Day(1)).await, Some(1));
        assert_eq!(stats_column_i64(pool, "proposed_blocks", 7, Day(0)).await, None);
        assert!(get_status(pool, Day(1)).await.unwrap().block_stats_exported);
    }
}
