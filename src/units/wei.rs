use std::{
    fmt::Display,
    iter::Sum,
    num::ParseIntError,
    ops::{Add, Sub},
    str::FromStr,
};

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::{GweiNewtype, WEI_PER_ETH};

// Execution layer amounts. An i128 holds ~1.7e20 ETH which is plenty for per validator fee and
// bribe sums. Chain wide sums go through BigDecimal instead. Stored as NUMERIC.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(into = "String")]
#[serde(try_from = "String")]
pub struct WeiNewtype(pub i128);

impl WeiNewtype {
    pub fn from_eth(eth: i128) -> Self {
        Self(eth * WEI_PER_ETH)
    }
}

impl Add<WeiNewtype> for WeiNewtype {
    type Output = Self;

    fn add(self, WeiNewtype(rhs): Self) -> Self::Output {
        let WeiNewtype(lhs) = self;
        let result = lhs
            .checked_add(rhs)
            .expect("caused overflow in wei addition");
        WeiNewtype(result)
    }
}

impl Sub<WeiNewtype> for WeiNewtype {
    type Output = Self;

    fn sub(self, WeiNewtype(rhs): WeiNewtype) -> Self::Output {
        let WeiNewtype(lhs) = self;
        let result = lhs
            .checked_sub(rhs)
            .expect("caused underflow in wei subtraction");
        WeiNewtype(result)
    }
}

impl Sum for WeiNewtype {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(WeiNewtype(0), |sum, wei| sum + wei)
    }
}

impl Display for WeiNewtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let WeiNewtype(amount) = self;
        write!(f, "{amount}")
    }
}

impl From<WeiNewtype> for String {
    fn from(WeiNewtype(amount): WeiNewtype) -> Self {
        amount.to_string()
    }
}

impl FromStr for WeiNewtype {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i128>().map(WeiNewtype)
    }
}

impl TryFrom<String> for WeiNewtype {
    type Error = ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse::<i128>().map(WeiNewtype)
    }
}

impl From<i128> for WeiNewtype {
    fn from(amount: i128) -> Self {
        WeiNewtype(amount)
    }
}

impl From<GweiNewtype> for WeiNewtype {
    fn from(GweiNewtype(amount): GweiNewtype) -> Self {
        (amount as i128 * GweiNewtype::WEI_PER_GWEI as i128).into()
    }
}

// NUMERIC binds go through BigDecimal, i128 has no native Postgres encoding.
impl From<WeiNewtype> for BigDecimal {
    fn from(WeiNewtype(amount): WeiNewtype) -> Self {
        BigDecimal::from(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wei_from_gwei_test() {
        let wei: WeiNewtype = GweiNewtype(3).into();
        assert_eq!(wei, WeiNewtype(3_000_000_000));
    }

    #[test]
    fn wei_sum_test() {
        let total: WeiNewtype = vec![WeiNewtype::from_eth(1), WeiNewtype(5)]
            .into_iter()
            .sum();
        assert_eq!(total, WeiNewtype(1_000_000_000_000_000_005));
    }

    #[test]
    fn wei_serializes_as_string_test() {
        let json = serde_json::to_string(&WeiNewtype(12)).unwrap();
        assert_eq!(json, "\"12\"");
        let wei: WeiNewtype = serde_json::from_str("\"12\"").unwrap();
        assert_eq!(wei, WeiNewtype(12));
    }

    #[test]
    fn wei_into_big_decimal_keeps_precision_test() {
        let wei = WeiNewtype(123_456_789_012_345_678_901_234_567);
        let decimal: BigDecimal = wei.into();
        assert_eq!(decimal.to_string(), "123456789012345678901234567");
    }
}
