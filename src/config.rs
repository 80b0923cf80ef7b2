//! Tunables of the statistics pipeline. None of these change what ends up in the tables, they
//! only change throughput, or, for the activation block, which days qualify for export at all.

use std::{str::FromStr, time::Duration};

use anyhow::Result;
use bigdecimal::BigDecimal;

use crate::{
    env::get_env_parsed,
    execution_chain::{BlockNumber, MERGE_BLOCK_NUMBER},
};

/// Postgres refuses statements with more bind parameters than fit in an i16 length prefix.
pub const POSTGRES_MAX_BIND_PARAMS: usize = 65_535;

/// Rows per merge statement for most writers. The ceiling allows far more, smaller batches were
/// measured to finish sooner.
pub const UPSERT_BATCH_SIZE: usize = 100;

/// Sync duties are written in one transaction, large batches keep it short.
pub const SYNC_DUTIES_BATCH_SIZE: usize = 13_000;

/// Epochs per failed attestation query against the indexer.
pub const ATTESTATION_EPOCH_BATCH_SIZE: i64 = 2;

/// Validator indices per total performance statement.
pub const PERFORMANCE_VALIDATOR_BATCH_SIZE: usize = 1_000;

/// Ceiling for a single stage, after which it fails and gets retried on the next run.
pub const STAGE_DEADLINE: Duration = Duration::from_secs(10 * 60);

/// Max in-flight batches per stage.
pub const WORKER_CONCURRENCY: usize = 8;

/// Blocks per descending fetch from the indexer when building chart series. Also the capacity
/// of the channel between block producer and consumer.
pub const CHART_BLOCK_BATCH_SIZE: i64 = 360;

/// ETH in existence at genesis of the execution chain, the base for market cap.
pub const GENESIS_SUPPLY_ETH: &str = "72009990.50";

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub upsert_batch_size: usize,
    pub sync_duties_batch_size: usize,
    pub attestation_epoch_batch_size: i64,
    pub performance_validator_batch_size: usize,
    pub stage_deadline: Duration,
    pub worker_concurrency: usize,
    pub chart_block_batch_size: i64,
    /// Days whose first block lies at or before this block are not exported as chart series.
    pub activation_block: BlockNumber,
    pub genesis_supply_eth: BigDecimal,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upsert_batch_size: UPSERT_BATCH_SIZE,
            sync_duties_batch_size: SYNC_DUTIES_BATCH_SIZE,
            attestation_epoch_batch_size: ATTESTATION_EPOCH_BATCH_SIZE,
            performance_validator_batch_size: PERFORMANCE_VALIDATOR_BATCH_SIZE,
            stage_deadline: STAGE_DEADLINE,
            worker_concurrency: WORKER_CONCURRENCY,
            chart_block_batch_size: CHART_BLOCK_BATCH_SIZE,
            activation_block: MERGE_BLOCK_NUMBER,
            genesis_supply_eth: BigDecimal::from_str(GENESIS_SUPPLY_ETH)
                .expect("expect genesis supply constant to be a valid decimal"),
        }
    }
}

impl PipelineConfig {
    /// Defaults, overridden by any `STATS_*` variable present in the environment.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            upsert_batch_size: get_env_parsed("STATS_UPSERT_BATCH_SIZE")?
                .unwrap_or(defaults.upsert_batch_size),
            sync_duties_batch_size: get_env_parsed("STATS_SYNC_DUTIES_BATCH_SIZE")?
                .unwrap_or(defaults.sync_duties_batch_size),
            attestation_epoch_batch_size: get_env_parsed("STATS_ATTESTATION_EPOCH_BATCH_SIZE")?
                .unwrap_or(defaults.attestation_epoch_batch_size),
            performance_validator_batch_size: get_env_parsed(
                "STATS_PERFORMANCE_VALIDATOR_BATCH_SIZE",
            )?
            .unwrap_or(defaults.performance_validator_batch_size),
            stage_deadline: get_env_parsed::<u64>("STATS_STAGE_DEADLINE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.stage_deadline),
            worker_concurrency: get_env_parsed("STATS_WORKER_CONCURRENCY")?
                .unwrap_or(defaults.worker_concurrency),
            chart_block_batch_size: get_env_parsed("STATS_CHART_BLOCK_BATCH_SIZE")?
                .unwrap_or(defaults.chart_block_batch_size),
            activation_block: get_env_parsed("STATS_ACTIVATION_BLOCK")?
                .unwrap_or(defaults.activation_block),
            genesis_supply_eth: defaults.genesis_supply_eth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_test() {
        let config = PipelineConfig::default();
        assert_eq!(config.upsert_batch_size, 100);
        assert_eq!(config.activation_block, 15_537_394);
        assert_eq!(config.genesis_supply_eth.to_string(), "72009990.50");
    }

    #[test]
    fn default_batch_sizes_fit_bind_ceiling_test() {
        // Widest rows are balances with ten columns.
        assert!(UPSERT_BATCH_SIZE * 10 <= POSTGRES_MAX_BIND_PARAMS);
        assert!(SYNC_DUTIES_BATCH_SIZE * 5 <= POSTGRES_MAX_BIND_PARAMS);
    }

    #[test]
    fn config_from_env_override_test() {
        std::env::set_var("STATS_WORKER_CONCURRENCY", "3");
        std::env::set_var("STATS_STAGE_DEADLINE_SECS", "60");
        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.worker_concurrency, 3);
        assert_eq!(config.stage_deadline, Duration::from_secs(60));
        assert_eq!(config.upsert_batch_size, UPSERT_BATCH_SIZE);
    }
}
