use sqlx::PgPool;
use tracing::debug;

use crate::beacon_chain::{Day, EpochRange, EPOCHS_PER_DAY};

use super::{ledger, StatsError};

fn check_finalized_count(day: Day, finalized: i64) -> Result<(), StatsError> {
    if finalized < EPOCHS_PER_DAY {
        Err(StatsError::NotFinalized {
            day,
            finalized,
            expected: EPOCHS_PER_DAY,
        })
    } else {
        Ok(())
    }
}

/// Fails with a retryable error unless every epoch of `range` is finalized. Statistics for a
/// day that can still reorg are never written.
pub async fn ensure_epochs_finalized(
    db_pool: &PgPool,
    day: Day,
    range: &EpochRange,
) -> Result<(), StatsError> {
    let finalized = ledger::count_finalized_epochs(db_pool, range).await?;
    debug!(%day, %range, finalized, "counted finalized epochs");
    check_finalized_count(day, finalized)
}

pub async fn ensure_day_finalized(db_pool: &PgPool, day: Day) -> Result<(), StatsError> {
    ensure_epochs_finalized(db_pool, day, &day.epoch_range()).await
}
