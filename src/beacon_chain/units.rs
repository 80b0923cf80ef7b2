use std::{
    fmt::Display,
    ops::{Add, Sub},
    str::FromStr,
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{GENESIS_TIMESTAMP, SLOTS_PER_EPOCH};

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialOrd, PartialEq, Serialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct Slot(pub i64);

impl Slot {
    pub const GENESIS: Self = Self(0);
    pub const SECONDS_PER_SLOT: i64 = 12;

    pub fn date_time(&self) -> DateTime<Utc> {
        self.into()
    }

    /// Returns the most recent slot at or before the given date_time.
    pub fn from_date_time_rounded_down(date_time: &DateTime<Utc>) -> Self {
        let diff_seconds = *date_time - *GENESIS_TIMESTAMP;
        let slot = diff_seconds.num_seconds().div_euclid(Slot::SECONDS_PER_SLOT);
        Self(slot)
    }

    pub fn epoch(&self) -> Epoch {
        Epoch(self.0.div_euclid(SLOTS_PER_EPOCH))
    }

    pub fn is_first_of_epoch(&self) -> bool {
        self.0 % SLOTS_PER_EPOCH == 0
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<i64> for Slot {
    type Output = Self;

    fn add(self, rhs: i64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<i64> for Slot {
    type Output = Self;

    fn sub(self, rhs: i64) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl From<Slot> for DateTime<Utc> {
    fn from(slot: Slot) -> Self {
        let seconds = slot.0 * Slot::SECONDS_PER_SLOT;
        *GENESIS_TIMESTAMP + Duration::seconds(seconds)
    }
}

impl From<&Slot> for DateTime<Utc> {
    fn from(slot: &Slot) -> Self {
        Into::<DateTime<Utc>>::into(*slot)
    }
}

impl FromStr for Slot {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialOrd, PartialEq, Serialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct Epoch(pub i64);

impl Epoch {
    pub fn first_slot(&self) -> Slot {
        Slot(self.0 * SLOTS_PER_EPOCH)
    }

    pub fn date_time(&self) -> DateTime<Utc> {
        self.first_slot().date_time()
    }
}

impl Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<i64> for Epoch {
    type Output = Self;

    fn add(self, rhs: i64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<i64> for Epoch {
    type Output = Self;

    fn sub(self, rhs: i64) -> Self::Output {
        Self(self.0 - rhs)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn slot_date_time_round_trip_test() {
        let slot = Slot(7_000_000);
        assert_eq!(Slot::from_date_time_rounded_down(&slot.date_time()), slot);
    }

    #[test]
    fn slot_rounds_down_within_slot_test() {
        let date_time = Slot(10).date_time() + Duration::seconds(11);
        assert_eq!(Slot::from_date_time_rounded_down(&date_time), Slot(10));
    }

    #[test]
    fn genesis_slot_date_time_test() {
        assert_eq!(
            Slot::GENESIS.date_time(),
            Utc.with_ymd_and_hms(2020, 12, 1, 12, 0, 23).unwrap()
        );
    }

    #[test]
    fn slot_epoch_test() {
        assert_eq!(Slot(0).epoch(), Epoch(0));
        assert_eq!(Slot(31).epoch(), Epoch(0));
        assert_eq!(Slot(32).epoch(), Epoch(1));
        assert!(Slot(64).is_first_of_epoch());
        assert!(!Slot(65).is_first_of_epoch());
    }

    #[test]
    fn epoch_first_slot_test() {
        assert_eq!(Epoch(3).first_slot(), Slot(96));
    }
}
