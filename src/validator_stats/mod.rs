//! Day granular per validator statistics. Each category writer fills its own columns of
//! `validator_stats` and flips its flag in `validator_stats_status`, the orchestrator runs them in
//! dependency order and skips what is already done.

mod balances;
mod block_stats;
mod cl_rewards;
mod deposits_withdrawals;
mod el_rewards;
mod errors;
mod export;
mod failed_attestations;
mod finalization;
mod income_history;
pub mod ledger;
pub mod status;
mod sync_duties;
mod total_performance;
pub mod upsert;
mod workers;

use crate::{
    beacon_chain::ValidatorIndex, config::PipelineConfig, db::DbPools, indexer::Indexer,
    relays::RelayData,
};

pub use balances::write_balances;
pub use block_stats::write_block_stats;
pub use cl_rewards::write_cl_rewards;
pub use deposits_withdrawals::write_deposits_withdrawals;
pub use el_rewards::write_el_rewards;
pub use errors::StatsError;
pub use export::export_day;
pub use failed_attestations::write_failed_attestations;
pub use finalization::{ensure_day_finalized, ensure_epochs_finalized};
pub use income_history::{income_history, IncomeHistoryPoint, IncomeHistorySources};
pub use status::{Category, ExportStatus};
pub use sync_duties::write_sync_duties;
pub use total_performance::write_total_performance;
pub use workers::WorkerGroup;

use upsert::{BatchWriter, UpsertTarget};

pub const VALIDATOR_STATS_KEY: &[&str] = &["validatorindex", "day"];

/// Everything a stage needs, built once at startup and borrowed by every stage.
#[derive(Clone, Copy)]
pub struct ExportContext<'a> {
    pub db: &'a DbPools,
    pub indexer: &'a dyn Indexer,
    pub relays: &'a dyn RelayData,
    pub config: &'a PipelineConfig,
}

impl<'a> ExportContext<'a> {
    pub fn new(
        db: &'a DbPools,
        indexer: &'a dyn Indexer,
        relays: &'a dyn RelayData,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            db,
            indexer,
            relays,
            config,
        }
    }

    pub fn worker_group(&self, stage: &'static str) -> WorkerGroup {
        WorkerGroup::new(stage, self.config.worker_concurrency, self.config.stage_deadline)
    }

    pub fn batch_writer(&self) -> &'a dyn BatchWriter {
        &self.db.writer
    }
}

/// Half open `[start, end)` ranges of validator indices covering `0..count`.
fn validator_index_ranges(
    count: ValidatorIndex,
    batch_size: usize,
) -> Vec<(ValidatorIndex, ValidatorIndex)> {
    let step = batch_size.max(1);
    (0..count)
        .step_by(step)
        .map(|start| (start, start.saturating_add(step as ValidatorIndex).min(count)))
        .collect()
}

/// Columns of `validator_stats` owned by one writer, keyed by validator and day.
const fn stats_target(columns: &'static [&'static str]) -> UpsertTarget {
    UpsertTarget::new("validator_stats", VALIDATOR_STATS_KEY, columns)
}
