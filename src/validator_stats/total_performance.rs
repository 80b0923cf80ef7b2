//! Cumulative reward totals per validator and day, and the `validator_performance` snapshot
//! derived from them. A total is the day's reward plus the total of the day before. Windowed
//! performance is the current total minus the total `w` days back, a validator without a row
//! that far back counts as having earned nothing before it.

use sqlx::PgPool;
use tracing::{debug, info, instrument};

use crate::beacon_chain::{Day, ValidatorIndex};

use super::{
    ensure_day_finalized, ledger,
    status::{self, Category},
    validator_index_ranges, ExportContext, StatsError,
};

/// Days back of the windowed performance columns.
const WINDOWS: [i32; 4] = [1, 7, 31, 365];

fn requirements(day: Day) -> Vec<(Day, Category)> {
    let previous = day.previous_or_genesis();
    vec![
        (day, Category::ClRewards),
        (day, Category::ElRewards),
        (previous, Category::ClRewards),
        (previous, Category::ElRewards),
    ]
}

async fn write_cumulative_totals(
    db_pool: &PgPool,
    day: Day,
    start: ValidatorIndex,
    end: ValidatorIndex,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "
        INSERT INTO validator_stats (
            validatorindex,
            day,
            cl_rewards_gwei_total,
            cl_proposer_rewards_gwei_total,
            el_rewards_wei_total,
            mev_rewards_wei_total
        )
        SELECT
            vs1.validatorindex,
            vs1.day,
            COALESCE(vs1.cl_rewards_gwei, 0) + COALESCE(vs2.cl_rewards_gwei_total, 0),
            COALESCE(vs1.cl_proposer_rewards_gwei, 0) + COALESCE(vs2.cl_proposer_rewards_gwei_total, 0),
            COALESCE(vs1.el_rewards_wei, 0) + COALESCE(vs2.el_rewards_wei_total, 0),
            COALESCE(vs1.mev_rewards_wei, 0) + COALESCE(vs2.mev_rewards_wei_total, 0)
        FROM validator_stats vs1
        LEFT JOIN validator_stats vs2
            ON vs2.validatorindex = vs1.validatorindex AND vs2.day = vs1.day - 1
        WHERE vs1.day = $1
        AND vs1.validatorindex >= $2 AND vs1.validatorindex < $3
        ON CONFLICT (validatorindex, day) DO UPDATE SET
            cl_rewards_gwei_total = excluded.cl_rewards_gwei_total,
            cl_proposer_rewards_gwei_total = excluded.cl_proposer_rewards_gwei_total,
            el_rewards_wei_total = excluded.el_rewards_wei_total,
            mev_rewards_wei_total = excluded.mev_rewards_wei_total
        ",
    )
    .bind(day)
    .bind(start)
    .bind(end)
    .execute(db_pool)
    .await?;

    Ok(result.rows_affected())
}

/// Overwrites the snapshot of every validator in the range, leaving `rank7d` at zero for the
/// ranking pass.
async fn write_performance_snapshot(
    db_pool: &PgPool,
    day: Day,
    start: ValidatorIndex,
    end: ValidatorIndex,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "
        INSERT INTO validator_performance (
            validatorindex,
            balance,
            performance1d,
            performance7d,
            performance31d,
            performance365d,
            rank7d,
            cl_performance_1d,
            cl_performance_7d,
            cl_performance_31d,
            cl_performance_365d,
            cl_performance_total,
            cl_proposer_performance_total,
            el_performance_1d,
            el_performance_7d,
            el_performance_31d,
            el_performance_365d,
            el_performance_total,
            mev_performance_1d,
            mev_performance_7d,
            mev_performance_31d,
            mev_performance_365d,
            mev_performance_total
        )
        SELECT
            cur.validatorindex,
            COALESCE(cur.end_balance, 0),
            COALESCE(cur.cl_rewards_gwei_total, 0) - COALESCE(d1.cl_rewards_gwei_total, 0),
            COALESCE(cur.cl_rewards_gwei_total, 0) - COALESCE(d7.cl_rewards_gwei_total, 0),
            COALESCE(cur.cl_rewards_gwei_total, 0) - COALESCE(d31.cl_rewards_gwei_total, 0),
            COALESCE(cur.cl_rewards_gwei_total, 0) - COALESCE(d365.cl_rewards_gwei_total, 0),
            0,
            COALESCE(cur.cl_rewards_gwei_total, 0) - COALESCE(d1.cl_rewards_gwei_total, 0),
            COALESCE(cur.cl_rewards_gwei_total, 0) - COALESCE(d7.cl_rewards_gwei_total, 0),
            COALESCE(cur.cl_rewards_gwei_total, 0) - COALESCE(d31.cl_rewards_gwei_total, 0),
            COALESCE(cur.cl_rewards_gwei_total, 0) - COALESCE(d365.cl_rewards_gwei_total, 0),
            COALESCE(cur.cl_rewards_gwei_total, 0),
            COALESCE(cur.cl_proposer_rewards_gwei_total, 0),
            COALESCE(cur.el_rewards_wei_total, 0) - COALESCE(d1.el_rewards_wei_total, 0),
            COALESCE(cur.el_rewards_wei_total, 0) - COALESCE(d7.el_rewards_wei_total, 0),
            COALESCE(cur.el_rewards_wei_total, 0) - COALESCE(d31.el_rewards_wei_total, 0),
            COALESCE(cur.el_rewards_wei_total, 0) - COALESCE(d365.el_rewards_wei_total, 0),
            COALESCE(cur.el_rewards_wei_total, 0),
            COALESCE(cur.mev_rewards_wei_total, 0) - COALESCE(d1.mev_rewards_wei_total, 0),
            COALESCE(cur.mev_rewards_wei_total, 0) - COALESCE(d7.mev_rewards_wei_total, 0),
            COALESCE(cur.mev_rewards_wei_total, 0) - COALESCE(d31.mev_rewards_wei_total, 0),
            COALESCE(cur.mev_rewards_wei_total, 0) - COALESCE(d365.mev_rewards_wei_total, 0),
            COALESCE(cur.mev_rewards_wei_total, 0)
        FROM validator_stats cur
        LEFT JOIN validator_stats d1
            ON d1.validatorindex = cur.validatorindex AND d1.day = $2
        LEFT JOIN validator_stats d7
            ON d7.validatorindex = cur.validatorindex AND d7.day = $3
        LEFT JOIN validator_stats d31
            ON d31.validatorindex = cur.validatorindex AND d31.day = $4
        LEFT JOIN validator_stats d365
            ON d365.validatorindex = cur.validatorindex AND d365.day = $5
        WHERE cur.day = $1
        AND cur.validatorindex >= $6 AND cur.validatorindex < $7
        ON CONFLICT (validatorindex) DO UPDATE SET
            balance = excluded.balance,
            performance1d = excluded.performance1d,
            performance7d = excluded.performance7d,
            performance31d = excluded.performance31d,
            performance365d = excluded.performance365d,
            rank7d = excluded.rank7d,
            cl_performance_1d = excluded.cl_performance_1d,
            cl_performance_7d = excluded.cl_performance_7d,
            cl_performance_31d = excluded.cl_performance_31d,
            cl_performance_365d = excluded.cl_performance_365d,
            cl_performance_total = excluded.cl_performance_total,
            cl_proposer_performance_total = excluded.cl_proposer_performance_total,
            el_performance_1d = excluded.el_performance_1d,
            el_performance_7d = excluded.el_performance_7d,
            el_performance_31d = excluded.el_performance_31d,
            el_performance_365d = excluded.el_performance_365d,
            el_performance_total = excluded.el_performance_total,
            mev_performance_1d = excluded.mev_performance_1d,
            mev_performance_7d = excluded.mev_performance_7d,
            mev_performance_31d = excluded.mev_performance_31d,
            mev_performance_365d = excluded.mev_performance_365d,
            mev_performance_total = excluded.mev_performance_total
        ",
    )
    .bind(day)
    .bind(day.minus(WINDOWS[0]))
    .bind(day.minus(WINDOWS[1]))
    .bind(day.minus(WINDOWS[2]))
    .bind(day.minus(WINDOWS[3]))
    .bind(start)
    .bind(end)
    .execute(db_pool)
    .await?;

    Ok(result.rows_affected())
}

/// Ties get consecutive ranks in whatever order the database returns them.
async fn rank_by_seven_day_performance(db_pool: &PgPool) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "
        UPDATE validator_performance
        SET rank7d = ranked.rank7d
        FROM (
            SELECT
                validatorindex,
                ROW_NUMBER() OVER (ORDER BY cl_performance_7d DESC)::INT AS rank7d
            FROM validator_performance
        ) ranked
        WHERE validator_performance.validatorindex = ranked.validatorindex
        ",
    )
    .execute(db_pool)
    .await?;

    Ok(result.rows_affected())
}

#[instrument(skip_all, fields(day = %day))]
pub async fn write_total_performance(ctx: &ExportContext<'_>, day: Day) -> Result<(), StatsError> {
    ensure_day_finalized(&ctx.db.reader, day).await?;
    status::ensure_exported(&ctx.db.writer, day, &requirements(day)).await?;

    let validator_count = ledger::validator_count(&ctx.db.reader).await?;
    let ranges =
        validator_index_ranges(validator_count, ctx.config.performance_validator_batch_size);
    let batch_count = ranges.len();
    debug!(validator_count, batches = batch_count, "writing cumulative totals");

    let db_pool = &ctx.db.writer;
    let group = ctx.worker_group("total_performance");
    group
        .run(ranges, |(start, end)| async move {
            write_cumulative_totals(db_pool, day, start, end).await?;
            write_performance_snapshot(db_pool, day, start, end).await?;
            debug!(batch_start = start, "saved total performance batch");
            Ok(())
        })
        .await?;

    let ranked = rank_by_seven_day_performance(db_pool).await?;

    status::mark_category_exported(db_pool, day, Category::TotalPerformance).await?;

    info!(batches = batch_count, ranked, "exported total performance");

    Ok(())
}
