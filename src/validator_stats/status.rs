//! Per day record of which statistic categories made it into `validator_stats`. Flags only ever
//! go from false to true, the overall `status` flips once all of them are set.

use std::fmt::Display;

use enum_iterator::{all, Sequence};
use sqlx::{FromRow, PgPool, Postgres};
use tracing::debug;

use crate::beacon_chain::Day;

use super::StatsError;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Sequence)]
pub enum Category {
    FailedAttestations,
    SyncDuties,
    WithdrawalsDeposits,
    BlockStats,
    Balance,
    ClRewards,
    ElRewards,
    TotalPerformance,
}

impl Category {
    pub fn column(&self) -> &'static str {
        match self {
            Self::FailedAttestations => "failed_attestations_exported",
            Self::SyncDuties => "sync_duties_exported",
            Self::WithdrawalsDeposits => "withdrawals_deposits_exported",
            Self::BlockStats => "block_stats_exported",
            Self::Balance => "balance_exported",
            Self::ClRewards => "cl_rewards_exported",
            Self::ElRewards => "el_rewards_exported",
            Self::TotalPerformance => "total_performance_exported",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column())
    }
}

#[derive(Clone, Debug, Default, FromRow, PartialEq)]
pub struct ExportStatus {
    pub status: bool,
    pub failed_attestations_exported: bool,
    pub sync_duties_exported: bool,
    pub withdrawals_deposits_exported: bool,
    pub balance_exported: bool,
    pub cl_rewards_exported: bool,
    pub el_rewards_exported: bool,
    pub total_performance_exported: bool,
    pub block_stats_exported: bool,
}

impl ExportStatus {
    pub fn is_exported(&self, category: Category) -> bool {
        match category {
            Category::FailedAttestations => self.failed_attestations_exported,
            Category::SyncDuties => self.sync_duties_exported,
            Category::WithdrawalsDeposits => self.withdrawals_deposits_exported,
            Category::BlockStats => self.block_stats_exported,
            Category::Balance => self.balance_exported,
            Category::ClRewards => self.cl_rewards_exported,
            Category::ElRewards => self.el_rewards_exported,
            Category::TotalPerformance => self.total_performance_exported,
        }
    }

    pub fn all_categories_exported(&self) -> bool {
        all::<Category>().all(|category| self.is_exported(category))
    }

    /// Nothing left to do for the day.
    pub fn is_complete(&self) -> bool {
        self.status && self.all_categories_exported()
    }

    pub fn missing(&self) -> Vec<Category> {
        all::<Category>()
            .filter(|category| !self.is_exported(*category))
            .collect()
    }
}

/// A day without a status row has nothing exported yet.
pub async fn get_status(db_pool: &PgPool, day: Day) -> sqlx::Result<ExportStatus> {
    let status = sqlx::query_as::<Postgres, ExportStatus>(
        "
        SELECT
            status,
            failed_attestations_exported,
            sync_duties_exported,
            withdrawals_deposits_exported,
            balance_exported,
            cl_rewards_exported,
            el_rewards_exported,
            total_performance_exported,
            block_stats_exported
        FROM validator_stats_status
        WHERE day = $1
        ",
    )
    .bind(day)
    .fetch_optional(db_pool)
    .await?;

    Ok(status.unwrap_or_default())
}

pub async fn mark_category_exported(
    db_pool: &PgPool,
    day: Day,
    category: Category,
) -> sqlx::Result<()> {
    let column = category.column();
    // The column comes from a closed set of names, never from input.
    let statement = format!(
        "
        INSERT INTO validator_stats_status (day, status, {column})
        VALUES ($1, FALSE, TRUE)
        ON CONFLICT (day) DO UPDATE SET
            {column} = excluded.{column}
        "
    );

    sqlx::query(&statement).bind(day).execute(db_pool).await?;

    debug!(%day, %category, "marked category exported");

    Ok(())
}

/// Sets the overall status of a day if every category flag is set. Returns whether the day is
/// complete. Calling it again for a complete day changes nothing.
pub async fn finalize_day(db_pool: &PgPool, day: Day) -> sqlx::Result<bool> {
    let mut transaction = db_pool.begin().await?;

    let status = sqlx::query_as::<Postgres, ExportStatus>(
        "
        SELECT
            status,
            failed_attestations_exported,
            sync_duties_exported,
            withdrawals_deposits_exported,
            balance_exported,
            cl_rewards_exported,
            el_rewards_exported,
            total_performance_exported,
            block_stats_exported
        FROM validator_stats_status
        WHERE day = $1
        FOR UPDATE
        ",
    )
    .bind(day)
    .fetch_optional(&mut *transaction)
    .await?;

    let complete = match status {
        Some(status) if status.all_categories_exported() => {
            if !status.status {
                sqlx::query("UPDATE validator_stats_status SET status = TRUE WHERE day = $1")
                    .bind(day)
                    .execute(&mut *transaction)
                    .await?;
            }
            true
        }
        _ => false,
    };

    transaction.commit().await?;

    Ok(complete)
}

/// Fails with the full list of unmet requirements, each a category that has to be exported for
/// a given day.
pub async fn ensure_exported(
    db_pool: &PgPool,
    day: Day,
    requirements: &[(Day, Category)],
) -> Result<(), StatsError> {
    let mut missing = Vec::new();
    for (required_day, category) in requirements {
        let status = get_status(db_pool, *required_day).await?;
        if !status.is_exported(*category) {
            missing.push(format!("{category} for day {required_day}"));
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(StatsError::DependencyMissing { day, missing })
    }
}

/// Highest day that was exported completely.
pub async fn last_exported_day(db_pool: &PgPool) -> sqlx::Result<Option<Day>> {
    sqlx::query_scalar::<Postgres, Day>(
        "
        SELECT day
        FROM validator_stats_status
        WHERE status
        ORDER BY day DESC
        LIMIT 1
        ",
    )
    .fetch_optional(db_pool)
    .await
}

#[cfg(test)]
pub mod tests {
    use test_context::test_context;

    use super::*;
    use crate::db::tests::TestDb;

    pub async fn mark_categories_exported(db_pool: &PgPool, day: Day, categories: &[Category]) {
        for category in categories {
            mark_category_exported(db_pool, day, *category).await.unwrap();
        }
    }

    pub async fn mark_all_categories_exported(db_pool: &PgPool, day: Day) {
        let categories: Vec<Category> = all::<Category>().collect();
        mark_categories_exported(db_pool, day, &categories).await;
    }

    #[test]
    fn category_count_test() {
        assert_eq!(all::<Category>().count(), 8);
    }

    #[test]
    fn missing_categories_test() {
        let status = ExportStatus {
            balance_exported: true,
            cl_rewards_exported: true,
            ..ExportStatus::default()
        };

        let missing = status.missing();
        assert_eq!(missing.len(), 6);
        assert!(!missing.contains(&Category::Balance));
        assert!(!status.all_categories_exported());
    }

    #[test]
    fn complete_requires_status_and_flags_test() {
        let all_flags = ExportStatus {
            status: false,
            failed_attestations_exported: true,
            sync_duties_exported: true,
            withdrawals_deposits_exported: true,
            balance_exported: true,
            cl_rewards_exported: true,
            el_rewards_exported: true,
            total_performance_exported: true,
            block_stats_exported: true,
        };
        assert!(all_flags.all_categories_exported());
        assert!(!all_flags.is_complete());

        let complete = ExportStatus {
            status: true,
            ..all_flags
        };
        assert!(complete.is_complete());
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn get_status_missing_row_test(test_db: &TestDb) {
        let status = get_status(&test_db.pool, Day(3)).await.unwrap();
        assert_eq!(status, ExportStatus::default());
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn mark_category_exported_test(test_db: &TestDb) {
        mark_category_exported(&test_db.pool, Day(3), Category::Balance)
            .await
            .unwrap();
        mark_category_exported(&test_db.pool, Day(3), Category::SyncDuties)
            .await
            .unwrap();
        // Idempotent.
        mark_category_exported(&test_db.pool, Day(3), Category::SyncDuties)
            .await
            .unwrap();

        let status = get_status(&test_db.pool, Day(3)).await.unwrap();
        assert!(status.balance_exported);
        assert!(status.sync_duties_exported);
        assert!(!status.status);
        assert_eq!(status.missing().len(), 6);
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn finalize_day_incomplete_test(test_db: &TestDb) {
        assert!(!finalize_day(&test_db.pool, Day(3)).await.unwrap());

        mark_categories_exported(&test_db.pool, Day(3), &[Category::Balance]).await;
        assert!(!finalize_day(&test_db.pool, Day(3)).await.unwrap());

        let status = get_status(&test_db.pool, Day(3)).await.unwrap();
        assert!(!status.status);
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn finalize_day_complete_test(test_db: &TestDb) {
        mark_all_categories_exported(&test_db.pool, Day(3)).await;

        assert!(finalize_day(&test_db.pool, Day(3)).await.unwrap());
        assert!(finalize_day(&test_db.pool, Day(3)).await.unwrap());

        let status = get_status(&test_db.pool, Day(3)).await.unwrap();
        assert!(status.is_complete());
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn ensure_exported_lists_missing_test(test_db: &TestDb) {
        mark_categories_exported(&test_db.pool, Day(4), &[Category::Balance]).await;

        let requirements = [
            (Day(4), Category::Balance),
            (Day(4), Category::WithdrawalsDeposits),
            (Day(3), Category::Balance),
        ];
        let error = ensure_exported(&test_db.pool, Day(4), &requirements)
            .await
            .unwrap_err();

        match error {
            StatsError::DependencyMissing { day, missing } => {
                assert_eq!(day, Day(4));
                assert_eq!(
                    missing,
                    vec![
                        "withdrawals_deposits_exported for day 4".to_string(),
                        "balance_exported for day 3".to_string(),
                    ]
                );
            }
            error => panic!("expected missing dependency, got {error}"),
        }

        mark_categories_exported(
            &test_db.pool,
            Day(4),
            &[Category::WithdrawalsDeposits],
        )
        .await;
        mark_categories_exported(&test_db.pool, Day(3), &[Category::Balance]).await;
        ensure_exported(&test_db.pool, Day(4), &requirements)
            .await
            .unwrap();
    }

    #[test_context(TestDb)]
    #[tokio::test]
    async fn last_exported_day_test(test_db: &TestDb) {
        assert_eq!(last_exported_day(&test_db.pool).await.unwrap(), None);

        mark_all_categories_exported(&test_db.pool, Day(1)).await;
        mark_all_categories_exported(&test_db.pool, Day(2)).await;
        mark_categories_exported(&test_db.pool, Day(3), &[Category::Balance]).await;
        finalize_day(&test_db.pool, Day(1)).await.unwrap();
        finalize_day(&test_db.pool, Day(2)).await.unwrap();
        finalize_day(&test_db.pool, Day(3)).await.unwrap();

        assert_eq!(last_exported_day(&test_db.pool).await.unwrap(), Some(Day(2)));
    }
}
