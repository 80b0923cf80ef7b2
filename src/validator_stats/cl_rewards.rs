//! Consensus layer income is derived from what the other writers stored: the change in end
//! balance over the day, corrected for money that moved in and out through deposits and
//! withdrawals. Proposer inclusion rewards come from the indexer and get their own column.

use std::collections::HashMap;

use sqlx::PgPool;
use tracing::{debug, info, instrument};

use crate::{
    beacon_chain::{Day, ValidatorIndex},
    indexer::ProposerIncome,
    units::GweiNewtype,
};

use super::{
    ensure_day_finalized, ledger, stats_target,
    status::{self, Category},
    upsert::{plan_batches, SqlValue, UpsertRow, UpsertTarget},
    validator_index_ranges, ExportContext, StatsError,
};

const PROPOSER_REWARDS_TARGET: UpsertTarget =
    stats_target(&["validatorindex", "day", "cl_proposer_rewards_gwei"]);

struct ProposerRewardsRow {
    index: ValidatorIndex,
    day: Day,
    rewards: GweiNewtype,
}

impl UpsertRow for ProposerRewardsRow {
    fn values(&self) -> Vec<SqlValue> {
        vec![self.index.into(), self.day.into(), self.rewards.into()]
    }
}

fn proposer_rewards_by_index(
    incomes: &[ProposerIncome],
) -> HashMap<ValidatorIndex, GweiNewtype> {
    incomes
        .iter()
        .map(|income| (income.index, income.total()))
        .collect()
}

/// Every index in `[start, end)` gets a row, validators that proposed nothing get zero.
fn proposer_rows(
    day: Day,
    start: ValidatorIndex,
    end: ValidatorIndex,
    rewards: &HashMap<ValidatorIndex, GweiNewtype>,
) -> Vec<ProposerRewardsRow> {
    (start..end)
        .map(|index| ProposerRewardsRow {
            index,
            day,
            rewards: rewards.get(&index).copied().unwrap_or_default(),
        })
        .collect()
}

fn requirements(day: Day) -> Vec<(Day, Category)> {
    let mut requirements = vec![
        (day, Category::Balance),
        (day, Category::WithdrawalsDeposits),
    ];
    if day > Day::GENESIS {
        let previous = day.previous_or_genesis();
        requirements.push((previous, Category::Balance));
        requirements.push((previous, Category::WithdrawalsDeposits));
    }
    requirements
}

/// On genesis there is no previous day, the start balance stands in for its end balance.
async fn derive_consensus_rewards(
    db_pool: &PgPool,
    day: Day,
    start: ValidatorIndex,
    end: ValidatorIndex,
) -> sqlx::Result<()> {
    let statement = if day == Day::GENESIS {
        "
        INSERT INTO validator_stats (validatorindex, day, cl_rewards_gwei)
        SELECT
            cur.validatorindex,
            cur.day,
            COALESCE(cur.end_balance, 0)
                - COALESCE(cur.start_balance, 0)
                + COALESCE(cur.withdrawals_amount, 0)
                - COALESCE(cur.deposits_amount, 0)
        FROM validator_stats cur
        WHERE cur.day = $1
        AND cur.validatorindex >= $2 AND cur.validatorindex < $3
        ON CONFLICT (validatorindex, day) DO UPDATE SET
            cl_rewards_gwei = excluded.cl_rewards_gwei
        "
    } else {
        "
        INSERT INTO validator_stats (validatorindex, day, cl_rewards_gwei)
        SELECT
            cur.validatorindex,
            cur.day,
            COALESCE(cur.end_balance, 0)
                - COALESCE(last.end_balance, 0)
                + COALESCE(cur.withdrawals_amount, 0)
                - COALESCE(cur.deposits_amount, 0)
        FROM validator_stats cur
        LEFT JOIN validator_stats last
            ON last.validatorindex = cur.validatorindex AND last.day = cur.day - 1
        WHERE cur.day = $1
        AND cur.validatorindex >= $2 AND cur.validatorindex < $3
        ON CONFLICT (validatorindex, day) DO UPDATE SET
            cl_rewards_gwei = excluded.cl_rewards_gwei
        "
    };

    sqlx::query(statement)
        .bind(day)
        .bind(start)
        .bind(end)
        .execute(db_pool)
        .await?;

    Ok(())
}

#[instrument(skip_all, fields(day = %day))]
pub async fn write_cl_rewards(ctx: &ExportContext<'_>, day: Day) -> Result<(), StatsError> {
    ensure_day_finalized(&ctx.db.reader, day).await?;
    status::ensure_exported(&ctx.db.writer, day, &requirements(day)).await?;

    let incomes = ctx
        .indexer
        .aggregated_income(day.epoch_range())
        .await
        .map_err(StatsError::Aggregation)?;
    let rewards = proposer_rewards_by_index(&incomes);

    let highest_proposer = rewards.keys().max().map_or(0, |index| index + 1);
    let validator_count = ledger::validator_count(&ctx.db.reader)
        .await?
        .max(highest_proposer);
    debug!(validator_count, proposers = rewards.len(), "deriving consensus rewards");

    let ranges = validator_index_ranges(validator_count, ctx.config.upsert_batch_size);
    let batch_count = ranges.len();
    let group = ctx.worker_group("cl_rewards");
    let writer = ctx.batch_writer();
    let rewards = &rewards;

    group
        .run(ranges, |(start, end)| async move {
            let rows = proposer_rows(day, start, end, rewards);
            for batch in plan_batches(&PROPOSER_REWARDS_TARGET, &rows, rows.len())? {
                writer.execute_batch(batch).await?;
            }
            derive_consensus_rewards(&ctx.db.writer, day, start, end).await?;
            debug!(batch_start = start, "saved consensus rewards batch");
            Ok(())
        })
        .await?;

    status::mark_category_exported(&ctx.db.writer, day, Category::ClRewards).await?;

    info!(batches = batch_count, validator_count, "exported consensus rewards");

    Ok(())
}
