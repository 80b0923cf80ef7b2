use std::fmt::Display;

use bigdecimal::{BigDecimal, Zero};

use crate::units::{GweiNewtype, WeiNewtype, WEI_PER_ETH};

use super::accumulator::BlockTotals;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Indicator {
    BurnedFees,
    NonFailedTxGasUsage,
    BlockCount,
    BlockTimeAvg,
    TotalEmission,
    AvgGasPrice,
    AvgGasUsed,
    TotalGasUsed,
    AvgGasLimit,
    AvgBlockUtil,
    MarketCap,
    TxCount,
}

impl Indicator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Indicator::BurnedFees => "BURNED_FEES",
            Indicator::NonFailedTxGasUsage => "NON_FAILED_TX_GAS_USAGE",
            Indicator::BlockCount => "BLOCK_COUNT",
            Indicator::BlockTimeAvg => "BLOCK_TIME_AVG",
            Indicator::TotalEmission => "TOTAL_EMISSION",
            Indicator::AvgGasPrice => "AVG_GASPRICE",
            Indicator::AvgGasUsed => "AVG_GASUSED",
            Indicator::TotalGasUsed => "TOTAL_GASUSED",
            Indicator::AvgGasLimit => "AVG_GASLIMIT",
            Indicator::AvgBlockUtil => "AVG_BLOCK_UTIL",
            Indicator::MarketCap => "MARKET_CAP",
            Indicator::TxCount => "TX_COUNT",
        }
    }
}

impl Display for Indicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything besides the block totals that goes into a day's points.
pub struct IndicatorInputs<'a> {
    pub totals: &'a BlockTotals,
    /// Consensus layer income of all validators on the day.
    pub consensus_rewards: GweiNewtype,
    /// Total emission stored for the most recent earlier day, in wei.
    pub previous_total_emission: &'a BigDecimal,
    pub eth_price_usd: &'a BigDecimal,
    pub genesis_supply_eth: &'a BigDecimal,
}

/// New ETH over the day in wei. Execution blocks carry no issuance since the merge, what the
/// chain adds is consensus income plus tips, minus what the base fee burned.
pub fn day_emission(totals: &BlockTotals, consensus_rewards: GweiNewtype) -> BigDecimal {
    BigDecimal::from(WeiNewtype::from(consensus_rewards)) + &totals.tips - &totals.burned
}

/// Averages are only emitted when they have a non zero denominator.
pub fn indicator_values(inputs: &IndicatorInputs) -> Vec<(Indicator, BigDecimal)> {
    let totals = inputs.totals;
    let block_count = BigDecimal::from(totals.block_count);

    let total_emission = inputs.previous_total_emission
        + day_emission(totals, inputs.consensus_rewards);
    let supply_eth =
        &total_emission / &BigDecimal::from(WEI_PER_ETH) + inputs.genesis_supply_eth;
    let market_cap = supply_eth * inputs.eth_price_usd;

    let mut values = vec![
        (Indicator::BurnedFees, totals.burned.clone()),
        (Indicator::NonFailedTxGasUsage, totals.non_failed_gas_used()),
        (Indicator::BlockCount, block_count.clone()),
        (Indicator::BlockTimeAvg, totals.average_block_time()),
        (Indicator::TotalEmission, total_emission),
        (Indicator::TotalGasUsed, totals.total_gas_used.clone()),
        (Indicator::MarketCap, market_cap),
        (Indicator::TxCount, BigDecimal::from(totals.tx_count)),
    ];

    if !totals.total_gas_price.is_zero() && totals.gas_price_tx_count > 0 {
        values.push((
            Indicator::AvgGasPrice,
            &totals.total_gas_price / &BigDecimal::from(totals.gas_price_tx_count),
        ));
    }

    if totals.tx_count > 0 {
        values.push((Indicator::AvgGasUsed, &totals.total_gas_used / &block_count));
    }

    if totals.block_count > 0 {
        values.push((Indicator::AvgGasLimit, &totals.total_gas_limit / &block_count));
    }

    if !totals.total_gas_limit.is_zero() {
        values.push((
            Indicator::AvgBlockUtil,
            &totals.total_gas_used / &totals.total_gas_limit * BigDecimal::from(100),
        ));
    }

    values
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, str::FromStr};

    use super::*;
    use crate::chart_series::accumulator::tests::{block, fee_market, legacy};

    fn values_by_indicator(inputs: &IndicatorInputs) -> HashMap<Indicator, BigDecimal> {
        indicator_values(inputs).into_iter().collect()
    }

    #[test]
    fn day_emission_test() {
        let totals = BlockTotals {
            burned: BigDecimal::from(1_500),
            tips: BigDecimal::from(700),
            ..BlockTotals::default()
        };
        assert_eq!(
            day_emission(&totals, GweiNewtype(2)),
            BigDecimal::from(1_999_999_200)
        );
    }

    #[test]
    fn indicator_values_test() {
        let mut totals = BlockTotals::default();
        totals
            .add_block(&block(3, 1_036, 10, vec![fee_market(1, 100, 30, 5)]))
            .unwrap();
        totals
            .add_block(&block(2, 1_024, 10, vec![legacy(0, 50, 14)]))
            .unwrap();
        totals.add_block(&block(1, 1_012, 10, vec![])).unwrap();

        let previous = BigDecimal::from_str("1000000000000000000").unwrap();
        let price = BigDecimal::from(2_000);
        let genesis_supply = BigDecimal::from_str("72009990.50").unwrap();
        let values = values_by_indicator(&IndicatorInputs {
            totals: &totals,
            consensus_rewards: GweiNewtype(2),
            previous_total_emission: &previous,
            eth_price_usd: &price,
            genesis_supply_eth: &genesis_supply,
        });

        assert_eq!(values.len(), 12);
        assert_eq!(values[&Indicator::BurnedFees], BigDecimal::from(1_500));
        assert_eq!(values[&Indicator::NonFailedTxGasUsage], BigDecimal::from(100));
        assert_eq!(values[&Indicator::BlockCount], BigDecimal::from(3));
        assert_eq!(values[&Indicator::BlockTimeAvg], BigDecimal::from(12));
        assert_eq!(
            values[&Indicator::TotalEmission],
            BigDecimal::from_str("1000000001999999200").unwrap()
        );
        assert_eq!(values[&Indicator::AvgGasPrice], BigDecimal::from(14));
        assert_eq!(values[&Indicator::AvgGasUsed], BigDecimal::from(50));
        assert_eq!(values[&Indicator::AvgGasLimit], BigDecimal::from(1_000));
        assert_eq!(values[&Indicator::AvgBlockUtil], BigDecimal::from(5));
        assert_eq!(
            values[&Indicator::MarketCap],
            BigDecimal::from_str("144019983000.0000039999984").unwrap()
        );
        assert_eq!(values[&Indicator::TxCount], BigDecimal::from(2));
    }

    #[test]
    fn averages_skipped_without_denominator_test() {
        let totals = BlockTotals::default();
        let zero = BigDecimal::zero();
        let price = BigDecimal::from(2_000);
        let values = values_by_indicator(&IndicatorInputs {
            totals: &totals,
            consensus_rewards: GweiNewtype(0),
            previous_total_emission: &zero,
            eth_price_usd: &price,
            genesis_supply_eth: &zero,
        });

        assert_eq!(values.len(), 8);
        assert!(!values.contains_key(&Indicator::AvgGasPrice));
        assert!(!values.contains_key(&Indicator::AvgGasUsed));
        assert!(!values.contains_key(&Indicator::AvgGasLimit));
        assert!(!values.contains_key(&Indicator::AvgBlockUtil));
    }

    #[test]
    fn fee_market_only_day_has_no_gas_price_average_test() {
        let mut totals = BlockTotals::default();
        totals
            .add_block(&block(1, 0, 10, vec![fee_market(1, 21_000, 30, 2)]))
            .unwrap();
        let zero = BigDecimal::zero();
        let values = values_by_indicator(&IndicatorInputs {
            totals: &totals,
            consensus_rewards: GweiNewtype(0),
            previous_total_emission: &zero,
            eth_price_usd: &zero,
            genesis_supply_eth: &zero,
        });

        assert!(!values.contains_key(&Indicator::AvgGasPrice));
        assert!(values.contains_key(&Indicator::AvgGasUsed));
    }
}
