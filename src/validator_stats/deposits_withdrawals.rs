use tracing::{debug, info, instrument};

use crate::beacon_chain::{Day, ValidatorIndex};

use super::{
    ensure_day_finalized,
    ledger::{self, DepositTotals, WithdrawalTotals},
    stats_target,
    status::{self, Category},
    upsert::{plan_batches, SqlValue, UpsertRow, UpsertTarget},
    ExportContext, StatsError,
};

const DEPOSITS_TARGET: UpsertTarget =
    stats_target(&["validatorindex", "day", "deposits", "deposits_amount"]);

const WITHDRAWALS_TARGET: UpsertTarget =
    stats_target(&["validatorindex", "day", "withdrawals", "withdrawals_amount"]);

impl UpsertRow for DepositTotals {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.validatorindex.into(),
            self.day.into(),
            self.deposits.into(),
            self.deposits_amount.into(),
        ]
    }
}

struct WithdrawalsRow {
    index: ValidatorIndex,
    day: Day,
    withdrawals: i32,
    withdrawals_amount: i64,
}

impl WithdrawalsRow {
    fn new(day: Day, totals: &WithdrawalTotals) -> Self {
        Self {
            index: totals.validatorindex,
            day,
            withdrawals: totals.withdrawals,
            withdrawals_amount: totals.withdrawals_amount,
        }
    }
}

impl UpsertRow for WithdrawalsRow {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.index.into(),
            self.day.into(),
            self.withdrawals.into(),
            self.withdrawals_amount.into(),
        ]
    }
}

/// Deposits and withdrawals show up in the balance one epoch after inclusion. Both are read
/// over the day's epochs shifted back by one, so they line up with the balance changes of the
/// day.
#[instrument(skip_all, fields(day = %day))]
pub async fn write_deposits_withdrawals(
    ctx: &ExportContext<'_>,
    day: Day,
) -> Result<(), StatsError> {
    ensure_day_finalized(&ctx.db.reader, day).await?;

    let range = day.epoch_range().shifted_back_one();
    let (first_slot, end_slot) = ledger::slot_bounds(&range);
    debug!(%range, %first_slot, %end_slot, "reading deposits and withdrawals");

    let (deposits, withdrawals) = futures::try_join!(
        ledger::deposits_by_validator(&ctx.db.reader, &range, day),
        ledger::withdrawals_by_validator(&ctx.db.reader, first_slot, end_slot),
    )?;

    let withdrawal_rows: Vec<WithdrawalsRow> = withdrawals
        .iter()
        .map(|totals| WithdrawalsRow::new(day, totals))
        .collect();

    let mut batches = plan_batches(&DEPOSITS_TARGET, &deposits, ctx.config.upsert_batch_size)?;
    batches.extend(plan_batches(
        &WITHDRAWALS_TARGET,
        &withdrawal_rows,
        ctx.config.upsert_batch_size,
    )?);

    if !batches.is_empty() {
        ctx.batch_writer()
            .execute_batches_atomically(batches)
            .await?;
    }

    status::mark_category_exported(&ctx.db.writer, day, Category::WithdrawalsDeposits).await?;

    info!(
        deposits = deposits.len(),
        withdrawals = withdrawal_rows.len(),
        "exported deposits and withdrawals"
    );

    Ok(())
}
