//! Running totals over a day of execution blocks. Wei amounts summed over tens of thousands of
//! blocks overflow fixed width integers, everything is kept as BigDecimal.

use bigdecimal::{BigDecimal, Zero};

use crate::{
    indexer::{FullBlock, FullTransaction},
    units::WeiNewtype,
    validator_stats::StatsError,
};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Transaction pricing as it affects fee accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pricing {
    /// Legacy and access list transactions pay a flat gas price.
    GasPrice,
    /// Everything since London: a max fee and a max priority fee on top of the base fee.
    FeeMarket,
}

impl Pricing {
    fn from_tx_type(tx_type: u8) -> Option<Self> {
        match tx_type {
            0 | 1 => Some(Self::GasPrice),
            2..=4 => Some(Self::FeeMarket),
            _ => None,
        }
    }
}

fn wei(amount: WeiNewtype) -> BigDecimal {
    BigDecimal::from(amount)
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockTotals {
    pub block_count: i64,
    pub tx_count: i64,
    pub gas_price_tx_count: i64,
    pub failed_tx_count: i64,
    pub total_gas_used: BigDecimal,
    pub failed_gas_used: BigDecimal,
    pub total_gas_limit: BigDecimal,
    /// Sum of gas prices of legacy and access list transactions.
    pub total_gas_price: BigDecimal,
    pub burned: BigDecimal,
    pub tips: BigDecimal,
    pub(crate) block_time_micros: i64,
    pub(crate) previous_timestamp: Option<i64>,
}

impl BlockTotals {
    /// Blocks are expected highest first, block time accumulates the gap to the block seen
    /// before.
    pub fn add_block(&mut self, block: &FullBlock) -> Result<(), StatsError> {
        let base_fee = wei(block.base_fee_per_gas);

        self.block_count += 1;
        self.total_gas_limit += BigDecimal::from(block.gas_limit);

        if let Some(previous) = self.previous_timestamp {
            self.block_time_micros += (previous - block.timestamp) * MICROS_PER_SECOND;
        }
        self.previous_timestamp = Some(block.timestamp);

        for transaction in &block.transactions {
            self.add_transaction(block, &base_fee, transaction)?;
        }

        Ok(())
    }

    fn add_transaction(
        &mut self,
        block: &FullBlock,
        base_fee: &BigDecimal,
        transaction: &FullTransaction,
    ) -> Result<(), StatsError> {
        let pricing = Pricing::from_tx_type(transaction.tx_type).ok_or_else(|| {
            StatsError::UnexpectedValue {
                what: "transaction type",
                value: transaction.tx_type.to_string(),
                context: format!("tx {} in block {}", transaction.hash, block.number),
            }
        })?;

        let gas_used = BigDecimal::from(transaction.gas_used);
        let tip_per_gas = match pricing {
            Pricing::GasPrice => {
                let gas_price = wei(transaction.gas_price);
                self.gas_price_tx_count += 1;
                self.total_gas_price += &gas_price;
                gas_price - base_fee
            }
            Pricing::FeeMarket => {
                let priority_fee = wei(transaction.max_priority_fee_per_gas);
                let fee_headroom = wei(transaction.max_fee_per_gas) - base_fee;
                priority_fee.min(fee_headroom)
            }
        };

        match transaction.status {
            0 => {
                self.failed_tx_count += 1;
                self.failed_gas_used += &gas_used;
            }
            1 => (),
            status => {
                return Err(StatsError::UnexpectedValue {
                    what: "transaction status",
                    value: status.to_string(),
                    context: format!("tx {} in block {}", transaction.hash, block.number),
                });
            }
        }

        self.tx_count += 1;
        self.burned += base_fee * &gas_used;
        self.tips += tip_per_gas * &gas_used;
        self.total_gas_used += gas_used;

        Ok(())
    }

    /// Mean gap between consecutive blocks, in seconds.
    pub fn average_block_time(&self) -> BigDecimal {
        if self.block_count < 2 {
            return BigDecimal::zero();
        }

        BigDecimal::from(self.block_time_micros)
            / BigDecimal::from(self.block_count - 1)
            / BigDecimal::from(MICROS_PER_SECOND)
    }

    pub fn non_failed_gas_used(&self) -> BigDecimal {
        &self.total_gas_used - &self.failed_gas_used
    }
}
