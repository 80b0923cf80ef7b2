//! Aggregate reads over the relational ledger the chain indexer maintains. These run against
//! the read replica.

use sqlx::{FromRow, PgPool, Postgres};

use crate::{
    beacon_chain::{Day, Epoch, EpochRange, Slot, ValidatorIndex, SLOTS_PER_EPOCH},
    execution_chain::BlockNumber,
    units::GweiNewtype,
};

#[derive(Clone, Debug, FromRow, PartialEq)]
pub struct BlockCounts {
    pub proposer: ValidatorIndex,
    pub proposed_blocks: i32,
    pub missed_blocks: i32,
    pub orphaned_blocks: i32,
}

#[derive(Clone, Debug, FromRow, PartialEq)]
pub struct Slashings {
    pub proposer: ValidatorIndex,
    pub attester_slashings: i32,
    pub proposer_slashings: i32,
}

#[derive(Clone, Debug, FromRow, PartialEq)]
pub struct DepositTotals {
    pub validatorindex: ValidatorIndex,
    pub day: Day,
    pub deposits: i32,
    pub deposits_amount: i64,
}

#[derive(Clone, Debug, FromRow, PartialEq)]
pub struct WithdrawalTotals {
    pub validatorindex: ValidatorIndex,
    pub withdrawals: i32,
    pub withdrawals_amount: i64,
}

#[derive(Clone, Debug, FromRow, PartialEq)]
pub struct CanonicalExecutionBlock {
    pub slot: Slot,
    pub exec_block_number: BlockNumber,
    pub proposer: ValidatorIndex,
}

/// Slots `[first, end)` covered by a range of epochs.
pub fn slot_bounds(range: &EpochRange) -> (Slot, Slot) {
    (range.first.first_slot(), (range.last + 1).first_slot())
}

pub async fn count_finalized_epochs(db_pool: &PgPool, range: &EpochRange) -> sqlx::Result<i64> {
    sqlx::query_scalar::<Postgres, i64>(
        "
        SELECT COUNT(*)
        FROM epochs
        WHERE epoch >= $1 AND epoch <= $2
        AND finalized
        ",
    )
    .bind(range.first)
    .bind(range.last)
    .fetch_one(db_pool)
    .await
}

pub async fn block_counts_by_proposer(
    db_pool: &PgPool,
    range: &EpochRange,
) -> sqlx::Result<Vec<BlockCounts>> {
    sqlx::query_as::<Postgres, BlockCounts>(
        "
        SELECT
            proposer,
            SUM(CASE WHEN status = '1' THEN 1 ELSE 0 END)::INT AS proposed_blocks,
            SUM(CASE WHEN status = '2' THEN 1 ELSE 0 END)::INT AS missed_blocks,
            SUM(CASE WHEN status = '3' THEN 1 ELSE 0 END)::INT AS orphaned_blocks
        FROM blocks
        WHERE epoch >= $1 AND epoch <= $2
        GROUP BY proposer
        ",
    )
    .bind(range.first)
    .bind(range.last)
    .fetch_all(db_pool)
    .await
}

/// Slashings included in canonical blocks, credited to the proposer that included them.
pub async fn slashings_by_proposer(
    db_pool: &PgPool,
    range: &EpochRange,
) -> sqlx::Result<Vec<Slashings>> {
    sqlx::query_as::<Postgres, Slashings>(
        "
        SELECT
            proposer,
            SUM(attesterslashingscount)::INT AS attester_slashings,
            SUM(proposerslashingscount)::INT AS proposer_slashings
        FROM blocks
        WHERE epoch >= $1 AND epoch <= $2
        AND status = '1'
        GROUP BY proposer
        ",
    )
    .bind(range.first)
    .bind(range.last)
    .fetch_all(db_pool)
    .await
}

/// Deposits included in canonical blocks of the range, attributed to `day`. Genesis deposits
/// sit in block 0 but were part of the balance before the chain started, on day 0 they are
/// attributed to day -1 so they never count as income. Day 0 takes every deposit regardless of
/// its signature, genesis deposits were all applied to the starting balances.
pub async fn deposits_by_validator(
    db_pool: &PgPool,
    range: &EpochRange,
    day: Day,
) -> sqlx::Result<Vec<DepositTotals>> {
    sqlx::query_as::<Postgres, DepositTotals>(
        "
        SELECT
            validators.validatorindex,
            CASE WHEN $3 = 0 AND blocks_deposits.block_slot = 0 THEN -1 ELSE $3 END AS day,
            COUNT(*)::INT AS deposits,
            SUM(blocks_deposits.amount)::BIGINT AS deposits_amount
        FROM blocks_deposits
        INNER JOIN validators ON blocks_deposits.publickey = validators.pubkey
        INNER JOIN blocks ON blocks_deposits.block_root = blocks.blockroot
        WHERE blocks.epoch >= $1 AND blocks.epoch <= $2
        AND blocks.status = '1'
        AND ($3 = 0 OR blocks_deposits.valid_signature)
        GROUP BY 1, 2
        ",
    )
    .bind(range.first)
    .bind(range.last)
    .bind(day)
    .fetch_all(db_pool)
    .await
}

/// Withdrawals included in canonical blocks with a slot in `[first_slot, end_slot)`.
pub async fn withdrawals_by_validator(
    db_pool: &PgPool,
    first_slot: Slot,
    end_slot: Slot,
) -> sqlx::Result<Vec<WithdrawalTotals>> {
    sqlx::query_as::<Postgres, WithdrawalTotals>(
        "
        SELECT
            blocks_withdrawals.validatorindex,
            COUNT(*)::INT AS withdrawals,
            SUM(blocks_withdrawals.amount)::BIGINT AS withdrawals_amount
        FROM blocks_withdrawals
        INNER JOIN blocks ON blocks_withdrawals.block_root = blocks.blockroot
        WHERE blocks_withdrawals.block_slot >= $1 AND blocks_withdrawals.block_slot < $2
        AND blocks.status = '1'
        GROUP BY blocks_withdrawals.validatorindex
        ",
    )
    .bind(first_slot)
    .bind(end_slot)
    .fetch_all(db_pool)
    .await
}

pub async fn canonical_execution_blocks(
    db_pool: &PgPool,
    range: &EpochRange,
) -> sqlx::Result<Vec<CanonicalExecutionBlock>> {
    sqlx::query_as::<Postgres, CanonicalExecutionBlock>(
        "
        SELECT slot, exec_block_number, proposer
        FROM blocks
        WHERE epoch >= $1 AND epoch <= $2
        AND exec_block_number > 0
        AND status = '1'
        ",
    )
    .bind(range.first)
    .bind(range.last)
    .fetch_all(db_pool)
    .await
}

/// One past the highest known validator index.
pub async fn validator_count(db_pool: &PgPool) -> sqlx::Result<ValidatorIndex> {
    sqlx::query_scalar::<Postgres, ValidatorIndex>(
        "
        SELECT COALESCE(MAX(validatorindex) + 1, 0)
        FROM validators
        ",
    )
    .fetch_one(db_pool)
    .await
}

pub async fn last_finalized_epoch(db_pool: &PgPool) -> sqlx::Result<Option<Epoch>> {
    sqlx::query_scalar::<Postgres, Epoch>(
        "
        SELECT epoch
        FROM epochs
        WHERE finalized
        ORDER BY epoch DESC
        LIMIT 1
        ",
    )
    .fetch_optional(db_pool)
    .await
}

/// Missed slots have no execution block, the first canonical block at or after the slot
/// stands in for it.
pub async fn first_execution_block_at_or_after(
    db_pool: &PgPool,
    slot: Slot,
) -> sqlx::Result<Option<BlockNumber>> {
    sqlx::query_scalar::<Postgres, BlockNumber>(
        "
        SELECT exec_block_number
        FROM blocks
        WHERE slot >= $1
        AND status = '1'
        AND exec_block_number IS NOT NULL
        ORDER BY slot ASC
        LIMIT 1
        ",
    )
    .bind(slot)
    .fetch_optional(db_pool)
    .await
}

pub async fn deposits_sum_for_epochs(
    db_pool: &PgPool,
    indices: &[ValidatorIndex],
    range: &EpochRange,
) -> sqlx::Result<GweiNewtype> {
    sqlx::query_scalar::<Postgres, i64>(
        "
        SELECT COALESCE(SUM(blocks_deposits.amount), 0)::BIGINT
        FROM blocks_deposits
        INNER JOIN validators ON blocks_deposits.publickey = validators.pubkey
        INNER JOIN blocks ON blocks_deposits.block_root = blocks.blockroot
        WHERE validators.validatorindex = ANY($1)
        AND blocks.epoch >= $2 AND blocks.epoch <= $3
        AND blocks.status = '1'
        AND blocks_deposits.valid_signature
        ",
    )
    .bind(indices)
    .bind(range.first)
    .bind(range.last)
    .fetch_one(db_pool)
    .await
    .map(GweiNewtype)
}

pub async fn withdrawals_sum_for_epochs(
    db_pool: &PgPool,
    indices: &[ValidatorIndex],
    range: &EpochRange,
) -> sqlx::Result<GweiNewtype> {
    let (first_slot, end_slot) = slot_bounds(range);

    sqlx::query_scalar::<Postgres, i64>(
        "
        SELECT COALESCE(SUM(blocks_withdrawals.amount), 0)::BIGINT
        FROM blocks_withdrawals
        INNER JOIN blocks ON blocks_withdrawals.block_root = blocks.blockroot
        WHERE blocks_withdrawals.validatorindex = ANY($1)
        AND blocks_withdrawals.block_slot >= $2 AND blocks_withdrawals.block_slot < $3
        AND blocks.status = '1'
        ",
    )
    .bind(indices)
    .bind(first_slot)
    .bind(end_slot)
    .fetch_one(db_pool)
    .await
    .map(GweiNewtype)
}

pub async fn end_balance_sum_for_day(
    db_pool: &PgPool,
    indices: &[ValidatorIndex],
    day: Day,
) -> sqlx::Result<GweiNewtype> {
    sqlx::query_scalar::<Postgres, i64>(
        "
        SELECT COALESCE(SUM(end_balance), 0)::BIGINT
        FROM validator_stats
        WHERE validatorindex = ANY($1)
        AND day = $2
        ",
    )
    .bind(indices)
    .bind(day)
    .fetch_one(db_pool)
    .await
    .map(GweiNewtype)
}

/// Consensus layer income of all validators on a day.
pub async fn consensus_rewards_sum_for_day(
    db_pool: &PgPool,
    day: Day,
) -> sqlx::Result<GweiNewtype> {
    sqlx::query_scalar::<Postgres, i64>(
        "
        SELECT COALESCE(SUM(cl_rewards_gwei), 0)::BIGINT
        FROM validator_stats
        WHERE day = $1
        ",
    )
    .bind(day)
    .fetch_one(db_pool)
    .await
    .map(GweiNewtype)
}
