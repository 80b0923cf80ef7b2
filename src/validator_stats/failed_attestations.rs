use std::collections::BTreeMap;

use tracing::{info, instrument};

use crate::{
    beacon_chain::{Day, ValidatorIndex},
    indexer::FailedAttestationStatistic,
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
    "missed_attestations",
    "orphaned_attestations",
]);

#[derive(Debug, PartialEq)]
struct FailedAttestationsRow {
    index: ValidatorIndex,
    day: Day,
    missed_attestations: i32,
    orphaned_attestations: i32,
}

impl UpsertRow for FailedAttestationsRow {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.index.into(),
            self.day.into(),
            self.missed_attestations.into(),
            self.orphaned_attestations.into(),
        ]
    }
}

/// Epoch windows are disjoint, a validator failing in several of them failed that many more
/// times, so counts are summed.
fn merge_windows(
    windows: Vec<Vec<FailedAttestationStatistic>>,
) -> BTreeMap<ValidatorIndex, (i32, i32)> {
    let mut merged = BTreeMap::new();
    for statistic in windows.into_iter().flatten() {
        let (missed, orphaned) = merged.entry(statistic.index).or_insert((0, 0));
        *missed += statistic.missed_attestations;
        *orphaned += statistic.orphaned_attestations;
    }
    merged
}

#[instrument(skip_all, fields(day = %day))]
pub async fn write_failed_attestations(ctx: &ExportContext<'_>, day: Day) -> Result<(), StatsError> {
    ensure_day_finalized(&ctx.db.reader, day).await?;

    let group = ctx.worker_group("failed_attestations");
    let windows = day
        .epoch_range()
        .sub_ranges(ctx.config.attestation_epoch_batch_size);
    let window_count = windows.len();

    let indexer = ctx.indexer;
    let partials = group
        .run(windows, |range| async move {
            indexer
                .failed_attestation_counts(range)
                .await
                .map_err(StatsError::Aggregation)
        })
        .await?;

    let rows: Vec<FailedAttestationsRow> = merge_windows(partials)
        .into_iter()
        .map(
            |(index, (missed_attestations, orphaned_attestations))| FailedAttestationsRow {
                index,
                day,
                missed_attestations,
                orphaned_attestations,
            },
        )
        .collect();

    let written = upsert::upsert_rows(
        ctx.batch_writer(),
        &group,
        &TARGET,
        &rows,
        ctx.config.upsert_batch_size,
    )
    .await?;

    status::mark_category_exported(&ctx.db.writer, day, Category::FailedAttestations).await?;

    info!(windows = window_count, validators = written, "exported failed attestations");

    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use test_context::test_context;

    use super::*;
    use crate::{
        db::tests::TestDb,
        validator_stats::{
            status::get_status,
            tests::{finalize_days, stats_column_i64, TestCollaborators},
        },
    };

    fn failed(index: ValidatorIndex, missed: i32, orphaned: i32) -> FailedAttestationStatistic {
        FailedAttestationStatistic {
            index,
            missed_attestations: missed,
            orphaned_attestations: orphaned,
        }
    }

    #[test]
    fn merge_windows_sums_test() {
        let merged = merge_windows(vec![
            vec![failed(1, 2, 0), failed(2, 1, 1)],
            vec![failed(1, 3, 1)],
            vec![],
        ]);

        assert_eq!(merged.get(&1), Some(&(5, 1)));
        assert_eq!(merged.get(&2), Some(&(1, 1)));
        assert_eq!(merged.len(), 2);
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn write_failed_attestations_test(test_db: &TestDb) {
        finalize_days(&test_db.pool, Day(1), Day(1)).await;

        let mut collaborators = TestCollaborators::new(test_db.pools());
        // 225 epochs in windows of two.
        collaborators
            .indexer
            .expect_failed_attestation_counts()
            .times(113)
            .returning(|range| {
                if range.first.0 == 225 {
                    Ok(vec![failed(9, 1, 0)])
                } else if range.last.0 == 449 {
                    Ok(vec![failed(9, 2, 1)])
                } else {
                    Ok(vec![])
                }
            });

        write_failed_attestations(&collaborators.context(), Day(1))
            .await
            .unwrap();

        let pool = &test_db.pool;
        assert_eq!(stats_column_i64(pool, "missed_attestations", 9, Day(1)).await, Some(3));
        assert_eq!(stats_column_i64(pool, "orphaned_attestations", 9, Day(1)).await, Some(1));
        assert!(get_status(pool, Day(1)).await.unwrap().failed_attestations_exported);
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn indexer_failure_marks_nothing_test(test_db: &TestDb) {
        finalize_days(&test_db.pool, Day(1), Day(1)).await;

        let mut collaborators = TestCollaborators::new(test_db.pools());
        collaborators
            .indexer
            .expect_failed_attestation_counts()
            .returning(|_| Err(anyhow!("indexer down")));

        let result = write_failed_attestations(&collaborators.context(), Day(1)).await;

        assert!(matches!(result, Err(StatsError::Aggregation(_))));
        assert!(!get_status(&test_db.pool, Day(1)).await.unwrap().failed_attestations_exported);
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn not_finalized_writes_nothing_test(test_db: &TestDb) {
        let collaborators = TestCollaborators::new(test_db.pools());

        let result = write_failed_attestations(&collaborators.context(), Day(1)).await;

        assert!(matches!(result, Err(StatsError::NotFinalized { .. })));
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM validator_stats")
            .fetch_one(&test_db.pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }
}
