use std::collections::{BTreeMap, HashMap};

use bigdecimal::BigDecimal;
use tracing::{info, instrument, warn};

use crate::{
    beacon_chain::{Day, ValidatorIndex},
    execution_chain::{BlockHash, BlockNumber},
    indexer::IndexedExecutionBlock,
    units::WeiNewtype,
};

use super::{
    ensure_day_finalized,
    ledger::{self, CanonicalExecutionBlock},
    stats_target,
    status::{self, Category},
    upsert::{self, SqlValue, UpsertRow, UpsertTarget},
    ExportContext, StatsError,
};

const TARGET: UpsertTarget =
    stats_target(&["validatorindex", "day", "el_rewards_wei", "mev_rewards_wei"]);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct ProposerElRewards {
    tx_fee_reward: WeiNewtype,
    mev_reward: WeiNewtype,
}

struct ElRewardsRow {
    index: ValidatorIndex,
    day: Day,
    rewards: ProposerElRewards,
}

impl UpsertRow for ElRewardsRow {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.index.into(),
            self.day.into(),
            BigDecimal::from(self.rewards.tx_fee_reward).into(),
            BigDecimal::from(self.rewards.mev_reward).into(),
        ]
    }
}

/// Sums execution rewards per proposer. A block delivered by a relay earns its proposer the
/// bribe, any other block earns the fees it collected.
fn rewards_by_proposer(
    canonical_blocks: &[CanonicalExecutionBlock],
    indexed_blocks: &[IndexedExecutionBlock],
    bribes: &HashMap<BlockHash, WeiNewtype>,
) -> Result<BTreeMap<ValidatorIndex, ProposerElRewards>, StatsError> {
    let proposers: HashMap<BlockNumber, ValidatorIndex> = canonical_blocks
        .iter()
        .map(|block| (block.exec_block_number, block.proposer))
        .collect();

    let mut rewards: BTreeMap<ValidatorIndex, ProposerElRewards> = BTreeMap::new();
    for block in indexed_blocks {
        let proposer =
            proposers
                .get(&block.number)
                .ok_or_else(|| StatsError::UnexpectedValue {
                    what: "execution block",
                    value: block.number.to_string(),
                    context: "indexed blocks, not in the canonical chain for the day".to_string(),
                })?;

        let entry = rewards.entry(*proposer).or_default();
        entry.tx_fee_reward = entry.tx_fee_reward + block.tx_reward;
        let mev_reward = bribes.get(&block.hash).copied().unwrap_or(block.tx_reward);
        entry.mev_reward = entry.mev_reward + mev_reward;
    }

    Ok(rewards)
}

#[instrument(skip_all, fields(day = %day))]
pub async fn write_el_rewards(ctx: &ExportContext<'_>, day: Day) -> Result<(), StatsError> {
    let range = day.epoch_range();
    ensure_day_finalized(&ctx.db.reader, day).await?;

    let canonical_blocks = ledger::canonical_execution_blocks(&ctx.db.reader, &range).await?;
    let block_numbers: Vec<BlockNumber> = canonical_blocks
        .iter()
        .map(|block| block.exec_block_number)
        .collect();

    let indexed_blocks = ctx
        .indexer
        .indexed_execution_blocks(&block_numbers)
        .await
        .map_err(StatsError::Aggregation)?;
    if indexed_blocks.len() != block_numbers.len() {
        warn!(
            expected = block_numbers.len(),
            got = indexed_blocks.len(),
            "indexer returned a different number of execution blocks"
        );
    }

    let block_hashes: Vec<BlockHash> = indexed_blocks
        .iter()
        .map(|block| block.hash.clone())
        .collect();
    let bribes = ctx
        .relays
        .relay_data_for_blocks(&block_hashes)
        .await
        .map_err(StatsError::Aggregation)?;

    let rewards = rewards_by_proposer(&canonical_blocks, &indexed_blocks, &bribes)?;
    let rows: Vec<ElRewardsRow> = rewards
        .into_iter()
        .map(|(index, rewards)| ElRewardsRow {
            index,
            day,
            rewards,
        })
        .collect();

    let written = upsert::upsert_rows_atomically(
        ctx.batch_writer(),
        &TARGET,
        &rows,
        ctx.config.upsert_batch_size,
    )
    .await?;

    status::mark_category_exported(&ctx.db.writer, day, Category::ElRewards).await?;

    info!(
        blocks = indexed_blocks.len(),
        relay_blocks = bribes.len(),
        proposers = written,
        "exported execution rewards"
    );

    Ok(())
}
