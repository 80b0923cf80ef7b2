//! The historical indexer holds per epoch validator data too large for the relational ledger:
//! balances, duties, income components, and full execution blocks.

mod http;

use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::{
    beacon_chain::{Epoch, EpochRange, ValidatorIndex},
    execution_chain::{BlockHash, BlockNumber, BlockRange},
    units::{GweiNewtype, WeiNewtype},
};

pub use http::IndexerHttp;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BalanceStatistic {
    pub index: ValidatorIndex,
    pub min_balance: GweiNewtype,
    pub max_balance: GweiNewtype,
    pub min_effective_balance: GweiNewtype,
    pub max_effective_balance: GweiNewtype,
    pub start_balance: GweiNewtype,
    pub start_effective_balance: GweiNewtype,
    pub end_balance: GweiNewtype,
    pub end_effective_balance: GweiNewtype,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SyncDutyStatistic {
    pub index: ValidatorIndex,
    pub participated_sync: i32,
    pub missed_sync: i32,
    pub orphaned_sync: i32,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FailedAttestationStatistic {
    pub index: ValidatorIndex,
    pub missed_attestations: i32,
    pub orphaned_attestations: i32,
}

/// Income a validator earned for including other validators' work in its proposals.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProposerIncome {
    pub index: ValidatorIndex,
    pub proposer_attestation_inclusion_reward: GweiNewtype,
    pub proposer_slashing_inclusion_reward: GweiNewtype,
    pub proposer_sync_inclusion_reward: GweiNewtype,
}

impl ProposerIncome {
    pub fn total(&self) -> GweiNewtype {
        self.proposer_attestation_inclusion_reward
            + self.proposer_slashing_inclusion_reward
            + self.proposer_sync_inclusion_reward
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IndexedExecutionBlock {
    pub number: BlockNumber,
    pub hash: BlockHash,
    /// Priority fees paid to the fee recipient.
    pub tx_reward: WeiNewtype,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FullTransaction {
    pub hash: String,
    #[serde(rename = "type")]
    pub tx_type: u8,
    pub status: u8,
    pub gas_used: i64,
    pub gas_price: WeiNewtype,
    pub max_fee_per_gas: WeiNewtype,
    pub max_priority_fee_per_gas: WeiNewtype,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FullBlock {
    pub number: BlockNumber,
    pub hash: BlockHash,
    /// Unix seconds.
    pub timestamp: i64,
    pub base_fee_per_gas: WeiNewtype,
    pub gas_limit: i64,
    pub transactions: Vec<FullTransaction>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ValidatorBalance {
    pub index: ValidatorIndex,
    pub balance: GweiNewtype,
}

#[automock]
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn balance_statistics(&self, range: EpochRange) -> Result<Vec<BalanceStatistic>>;
    async fn sync_duty_statistics(&self, range: EpochRange) -> Result<Vec<SyncDutyStatistic>>;
    async fn failed_attestation_counts(
        &self,
        range: EpochRange,
    ) -> Result<Vec<FailedAttestationStatistic>>;
    async fn aggregated_income(&self, range: EpochRange) -> Result<Vec<ProposerIncome>>;
    async fn indexed_execution_blocks(
        &self,
        block_numbers: &[BlockNumber],
    ) -> Result<Vec<IndexedExecutionBlock>>;
    /// Blocks with their transactions, highest block first.
    async fn full_blocks_descending(&self, range: BlockRange) -> Result<Vec<FullBlock>>;
    async fn balance_history(
        &self,
        indices: &[ValidatorIndex],
        epoch: Epoch,
    ) -> Result<Vec<ValidatorBalance>>;
}
