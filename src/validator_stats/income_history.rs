//! Read side of the statistics: per day income of a set of validators, plus an estimate for the
//! day currently in progress. Answers are cached for about an epoch, the cache only ever makes
//! answers faster, never different.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres};
use tracing::{debug, instrument, warn};

use crate::{
    beacon_chain::{Day, Epoch, EpochRange, Slot, ValidatorIndex, SLOTS_PER_EPOCH},
    caching::{CacheWriteQueue, ResultCache},
    indexer::Indexer,
    units::GweiNewtype,
};

use super::{ledger, status, StatsError};

/// Stands in for a missing upper bound, far beyond any day the chain will reach.
const UNBOUNDED_DAY: Day = Day(65_536);

/// The history changes with every finalized epoch.
const CACHE_MAX_AGE: Duration =
    Duration::from_secs((Slot::SECONDS_PER_SLOT * SLOTS_PER_EPOCH + 10) as u64);

#[derive(Clone, Debug, Deserialize, FromRow, PartialEq, Serialize)]
pub struct IncomeHistoryPoint {
    pub day: Day,
    pub cl_rewards_gwei: i64,
    /// Absent for the estimated day in progress.
    pub end_balance: Option<i64>,
}

pub struct IncomeHistorySources<'a> {
    pub db_pool: &'a PgPool,
    pub indexer: &'a dyn Indexer,
    pub cache: &'a dyn ResultCache,
    pub cache_writes: &'a CacheWriteQueue,
    pub chain_id: u64,
}

fn cache_key(
    chain_id: u64,
    indices: &[ValidatorIndex],
    lower: Day,
    upper: Day,
    last_finalized_epoch: Epoch,
) -> String {
    let indices = indices
        .iter()
        .map(|index| index.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("{chain_id}:validatorIncomeHistory:{lower}:{upper}:{last_finalized_epoch}:{indices}")
}

async fn stored_history(
    db_pool: &PgPool,
    indices: &[ValidatorIndex],
    lower: Day,
    upper: Day,
) -> sqlx::Result<Vec<IncomeHistoryPoint>> {
    sqlx::query_as::<Postgres, IncomeHistoryPoint>(
        "
        SELECT
            day,
            SUM(COALESCE(cl_rewards_gwei, 0))::BIGINT AS cl_rewards_gwei,
            SUM(COALESCE(end_balance, 0))::BIGINT AS end_balance
        FROM validator_stats
        WHERE validatorindex = ANY($1)
        AND day BETWEEN $2 AND $3
        GROUP BY day
        ORDER BY day
        ",
    )
    .bind(indices)
    .bind(lower)
    .bind(upper)
    .fetch_all(db_pool)
    .await
}

/// Income since the end of `last_day`: today's balance minus the balance at the end of the last
/// exported day, without the money moved in or out since.
async fn estimate_day_in_progress(
    sources: &IncomeHistorySources<'_>,
    indices: &[ValidatorIndex],
    last_day: Day,
    last_finalized_epoch: Epoch,
) -> Result<IncomeHistoryPoint, StatsError> {
    let current_day = last_day.next();
    let first_epoch = current_day.epoch_range().first;
    let since = (last_finalized_epoch >= first_epoch)
        .then(|| EpochRange::new(first_epoch, last_finalized_epoch));

    let latest_balances = async {
        sources
            .indexer
            .balance_history(indices, last_finalized_epoch)
            .await
            .map_err(StatsError::Aggregation)
    };
    let last_balance = async {
        ledger::end_balance_sum_for_day(sources.db_pool, indices, last_day)
            .await
            .map_err(StatsError::from)
    };
    let deposits = async {
        match &since {
            Some(range) => ledger::deposits_sum_for_epochs(sources.db_pool, indices, range)
                .await
                .map_err(StatsError::from),
            None => Ok(GweiNewtype(0)),
        }
    };
    let withdrawals = async {
        match &since {
            Some(range) => ledger::withdrawals_sum_for_epochs(sources.db_pool, indices, range)
                .await
                .map_err(StatsError::from),
            None => Ok(GweiNewtype(0)),
        }
    };

    let (latest_balances, last_balance, deposits, withdrawals) =
        futures::try_join!(latest_balances, last_balance, deposits, withdrawals)?;

    let total_balance: GweiNewtype = latest_balances.iter().map(|balance| balance.balance).sum();
    let cl_rewards = total_balance - last_balance - deposits + withdrawals;

    debug!(
        %current_day,
        %total_balance,
        %last_balance,
        %deposits,
        %withdrawals,
        "estimated income of day in progress"
    );

    Ok(IncomeHistoryPoint {
        day: current_day,
        cl_rewards_gwei: cl_rewards.0,
        end_balance: None,
    })
}

async fn cached_history(
    sources: &IncomeHistorySources<'_>,
    key: &str,
) -> Option<Vec<IncomeHistoryPoint>> {
    match sources.cache.get_with_timeout(key, CACHE_MAX_AGE).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(history) => Some(history),
            Err(e) => {
                warn!(key, "cached income history does not decode, ignoring it: {e}");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(key, "failed to read income history from cache: {e:#}");
            None
        }
    }
}

/// Per day consensus income and end balance summed over `indices`, for days `lower..=upper`.
/// Without an upper bound the day after the last stored one is appended as an estimate.
#[instrument(skip_all, fields(validators = indices.len(), %lower))]
pub async fn income_history(
    sources: &IncomeHistorySources<'_>,
    indices: &[ValidatorIndex],
    lower: Day,
    upper: Option<Day>,
    last_finalized_epoch: Epoch,
) -> Result<Vec<IncomeHistoryPoint>, StatsError> {
    if indices.is_empty() {
        return Ok(vec![]);
    }

    let mut indices = indices.to_vec();
    indices.sort_unstable();
    indices.dedup();

    let upper_bound = upper.unwrap_or(UNBOUNDED_DAY);
    let key = cache_key(
        sources.chain_id,
        &indices,
        lower,
        upper_bound,
        last_finalized_epoch,
    );

    if let Some(history) = cached_history(sources, &key).await {
        debug!(%key, "income history cache hit");
        return Ok(history);
    }

    let mut history = stored_history(sources.db_pool, &indices, lower, upper_bound).await?;

    if upper.is_none() {
        let last_day = match history.last() {
            Some(point) => point.day,
            // Nothing exported yet, the estimate covers everything since genesis.
            None => status::last_exported_day(sources.db_pool)
                .await?
                .unwrap_or(Day(-1)),
        };
        let estimate =
            estimate_day_in_progress(sources, &indices, last_day, last_finalized_epoch).await?;
        history.push(estimate);
    }

    match serde_json::to_value(&history) {
        Ok(value) => sources.cache_writes.submit(key, value),
        Err(e) => warn!("failed to encode income history for the cache: {e}"),
    }

    Ok(history)
}
