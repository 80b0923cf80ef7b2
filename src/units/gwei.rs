use std::{
    fmt,
    iter::Sum,
    ops::{Add, Sub},
};

use bigdecimal::BigDecimal;
use serde::{de, de::Visitor, Deserialize, Serialize};

// Consensus layer amounts. Balances, deposits, withdrawals and rewards all fit comfortably in an
// i64, and rewards can be negative on a bad day, so this is signed. Stored as BIGINT.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct GweiNewtype(pub i64);

impl fmt::Display for GweiNewtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl GweiNewtype {
    pub const WEI_PER_GWEI: i64 = 1_000_000_000;
}

impl Add<GweiNewtype> for GweiNewtype {
    type Output = Self;

    fn add(self, GweiNewtype(rhs): Self) -> Self::Output {
        let GweiNewtype(lhs) = self;
        let result = lhs
            .checked_add(rhs)
            .expect("caused overflow in gwei addition");
        GweiNewtype(result)
    }
}

impl Sub<GweiNewtype> for GweiNewtype {
    type Output = Self;

    fn sub(self, GweiNewtype(rhs): GweiNewtype) -> Self::Output {
        let GweiNewtype(lhs) = self;
        let result = lhs
            .checked_sub(rhs)
            .expect("caused underflow in gwei subtraction");
        GweiNewtype(result)
    }
}

impl Sum for GweiNewtype {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(GweiNewtype(0), |sum, gwei| sum + gwei)
    }
}

impl From<GweiNewtype> for String {
    fn from(GweiNewtype(amount): GweiNewtype) -> Self {
        amount.to_string()
    }
}

impl From<GweiNewtype> for BigDecimal {
    fn from(GweiNewtype(amount): GweiNewtype) -> Self {
        BigDecimal::from(amount)
    }
}

struct GweiAmountVisitor;

impl Visitor<'_> for GweiAmountVisitor {
    type Value = GweiNewtype;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a number, or string of number, representing some amount of ETH in Gwei")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        v.parse::<i64>().map(GweiNewtype).map_err(|error| {
            de::Error::invalid_value(
                de::Unexpected::Str(&format!("unexpected value: {v}, error: {error}")),
                &"a number as string: \"32000000000\", which fits within i64",
            )
        })
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(GweiNewtype(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        i64::try_from(v)
            .map(GweiNewtype)
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Unsigned(v), &self))
    }
}

impl<'de> Deserialize<'de> for GweiNewtype {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(GweiAmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gwei_add_test() {
        assert_eq!(GweiNewtype(1) + GweiNewtype(1), GweiNewtype(2));
    }

    #[test]
    fn gwei_sub_can_go_negative_test() {
        assert_eq!(GweiNewtype(1) - GweiNewtype(3), GweiNewtype(-2));
    }

    #[test]
    fn gwei_sum_test() {
        let total: GweiNewtype = vec![GweiNewtype(1), GweiNewtype(2), GweiNewtype(3)]
            .into_iter()
            .sum();
        assert_eq!(total, GweiNewtype(6));
    }

    #[test]
    fn gwei_deserialize_from_string_and_number_test() {
        let from_string: GweiNewtype = serde_json::from_str("\"32000000000\"").unwrap();
        let from_number: GweiNewtype = serde_json::from_str("32000000000").unwrap();
        assert_eq!(from_string, GweiNewtype(32_000_000_000));
        assert_eq!(from_number, GweiNewtype(32_000_000_000));
    }
}
