use std::time::Instant;

use enum_iterator::all;
use tracing::{error, info, instrument, warn};

use crate::beacon_chain::Day;

use super::{
    balances::write_balances,
    block_stats::write_block_stats,
    cl_rewards::write_cl_rewards,
    deposits_withdrawals::write_deposits_withdrawals,
    el_rewards::write_el_rewards,
    ensure_day_finalized,
    failed_attestations::write_failed_attestations,
    status::{self, Category, ExportStatus},
    sync_duties::write_sync_duties,
    total_performance::write_total_performance,
    ExportContext, StatsError,
};

async fn write_category(
    ctx: &ExportContext<'_>,
    day: Day,
    category: Category,
) -> Result<(), StatsError> {
    match category {
        Category::FailedAttestations => write_failed_attestations(ctx, day).await,
        Category::SyncDuties => write_sync_duties(ctx, day).await,
        Category::WithdrawalsDeposits => write_deposits_withdrawals(ctx, day).await,
        Category::BlockStats => write_block_stats(ctx, day).await,
        Category::Balance => write_balances(ctx, day).await,
        Category::ClRewards => write_cl_rewards(ctx, day).await,
        Category::ElRewards => write_el_rewards(ctx, day).await,
        Category::TotalPerformance => write_total_performance(ctx, day).await,
    }
}

/// Runs every category not yet exported for the day, in dependency order, then sets the overall
/// status. Stops at the first failing category; whatever completed before stays marked and is
/// skipped on the next run.
#[instrument(skip_all, fields(day = %day))]
pub async fn export_day(ctx: &ExportContext<'_>, day: Day) -> Result<ExportStatus, StatsError> {
    let start = Instant::now();

    let status = status::get_status(&ctx.db.writer, day).await?;
    if status.is_complete() {
        info!("day already exported, skipping");
        return Ok(status);
    }

    ensure_day_finalized(&ctx.db.reader, day).await?;

    for category in all::<Category>() {
        if status.is_exported(category) {
            info!(%category, "already exported, skipping");
            continue;
        }

        let category_start = Instant::now();
        if let Err(err) = write_category(ctx, day, category).await {
            error!(%category, %err, "category export failed, aborting day");
            return Err(err);
        }
        info!(%category, took = ?category_start.elapsed(), "category exported");
    }

    if !status::finalize_day(&ctx.db.writer, day).await? {
        let status = status::get_status(&ctx.db.writer, day).await?;
        warn!(missing = ?status.missing(), "not all categories marked after export");
        return Err(StatsError::DependencyMissing {
            day,
            missing: status
                .missing()
                .iter()
                .map(|category| category.to_string())
                .collect(),
        });
    }

    info!(took = ?start.elapsed(), "day exported");

    status::get_status(&ctx.db.writer, day)
        .await
        .map_err(StatsError::from)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_context::test_context;

    use super::*;
    use crate::{
        db::tests::TestDb,
        indexer::MockIndexer,
        validator_stats::{
            ledger::tests::{store_finalized_epochs, store_validator},
            status::tests::{mark_all_categories_exported, mark_categories_exported},
            tests::{finalize_days, TestCollaborators},
        },
    };

    fn expect_every_indexer_call(indexer: &mut MockIndexer) {
        indexer
            .expect_failed_attestation_counts()
            .returning(|_| Ok(vec![]));
        indexer
            .expect_sync_duty_statistics()
            .times(1)
            .returning(|_| Ok(vec![]));
        indexer
            .expect_balance_statistics()
            .times(1)
            .returning(|_| Ok(vec![]));
        indexer
            .expect_aggregated_income()
            .times(1)
            .returning(|_| Ok(vec![]));
        indexer
            .expect_indexed_execution_blocks()
            .times(1)
            .returning(|_| Ok(vec![]));
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn full_run_test(test_db: &TestDb) {
        let pool = &test_db.pool;
        finalize_days(pool, Day(99), Day(100)).await;
        store_validator(pool, 0).await;
        // Prior day fully exported.
        mark_all_categories_exported(pool, Day(99)).await;

        let mut collaborators = TestCollaborators::new(test_db.pools());
        expect_every_indexer_call(&mut collaborators.indexer);
        collaborators
            .relays
            .expect_relay_data_for_blocks()
            .times(1)
            .returning(|_| Ok(HashMap::new()));

        let status = export_day(&collaborators.context(), Day(100))
            .await
            .unwrap();

        assert!(status.all_categories_exported());
        assert!(status.is_complete());
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn resumes_from_failed_category_test(test_db: &TestDb) {
        let pool = &test_db.pool;
        finalize_days(pool, Day(99), Day(100)).await;
        mark_all_categories_exported(pool, Day(99)).await;
        mark_categories_exported(
            pool,
            Day(100),
            &[
                Category::FailedAttestations,
                Category::SyncDuties,
                Category::WithdrawalsDeposits,
                Category::BlockStats,
                Category::Balance,
                Category::ClRewards,
            ],
        )
        .await;

        // Only the execution rewards writer and total performance touch collaborators.
        let mut collaborators = TestCollaborators::new(test_db.pools());
        collaborators
            .indexer
            .expect_indexed_execution_blocks()
            .times(1)
            .returning(|_| Ok(vec![]));
        collaborators
            .relays
            .expect_relay_data_for_blocks()
            .times(1)
            .returning(|_| Ok(HashMap::new()));

        let status = export_day(&collaborators.context(), Day(100))
            .await
            .unwrap();

        assert!(status.el_rewards_exported);
        assert!(status.total_performance_exported);
        assert!(status.status);
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn not_finalized_writes_nothing_test(test_db: &TestDb) {
        let pool = &test_db.pool;
        let range = Day(100).epoch_range();
        // 223 of 225 epochs.
        store_finalized_epochs(pool, range.first.0, range.last.0 - 2, true).await;

        let collaborators = TestCollaborators::new(test_db.pools());
        let result = export_day(&collaborators.context(), Day(100)).await;

        match result {
            Err(error @ StatsError::NotFinalized { .. }) => assert!(error.is_retryable()),
            result => panic!("expected not finalized, got {result:?}"),
        }

        for table in ["validator_stats", "validator_stats_status", "validator_performance"] {
            let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(pool)
                .await
                .unwrap();
            assert_eq!(rows, 0, "{table} should be empty");
        }
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn failing_category_stops_day_test(test_db: &TestDb) {
        let pool = &test_db.pool;
        finalize_days(pool, Day(100), Day(100)).await;

        let mut collaborators = TestCollaborators::new(test_db.pools());
        collaborators
            .indexer
            .expect_failed_attestation_counts()
            .returning(|_| Err(anyhow::anyhow!("indexer down")));

        let result = export_day(&collaborators.context(), Day(100)).await;
        assert!(matches!(result, Err(StatsError::Aggregation(_))));

        let status = status::get_status(pool, Day(100)).await.unwrap();
        assert_eq!(status, ExportStatus::default());
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn complete_day_is_skipped_test(test_db: &TestDb) {
        let pool = &test_db.pool;
        mark_all_categories_exported(pool, Day(100)).await;
        status::finalize_day(pool, Day(100)).await.unwrap();

        // Not even the finalization gate is consulted.
        let collaborators = TestCollaborators::new(test_db.pools());
        let status = export_day(&collaborators.context(), Day(100))
            .await
            .unwrap();

        assert!(status.is_complete());
    }
}
