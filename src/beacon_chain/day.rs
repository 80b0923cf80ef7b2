//! The statistics pipeline keys everything by day. A day is a fixed count of consecutive epochs
//! counted from genesis, not a calendar day.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::{Epoch, EPOCHS_PER_DAY};

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialOrd, PartialEq, Serialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct Day(pub i32);

impl Day {
    pub const GENESIS: Self = Self(0);

    #[cfg(test)]
    pub fn from_epoch(epoch: Epoch) -> Self {
        Self(epoch.0.div_euclid(EPOCHS_PER_DAY) as i32)
    }

    pub fn epoch_range(&self) -> EpochRange {
        let first = Epoch(self.0 as i64 * EPOCHS_PER_DAY);
        EpochRange::new(first, first + (EPOCHS_PER_DAY - 1))
    }

    /// The day before this one, or this day itself for genesis.
    pub fn previous_or_genesis(&self) -> Self {
        Self((self.0 - 1).max(0))
    }

    /// Days back from this one. Allowed to go negative, windows before genesis simply hold no
    /// rows.
    pub fn minus(&self, days: i32) -> Self {
        Self(self.0 - days)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for Day {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Day> for i32 {
    fn from(Day(day): Day) -> Self {
        day
    }
}

/// Inclusive range of epochs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochRange {
    pub first: Epoch,
    pub last: Epoch,
}

impl EpochRange {
    pub fn new(first: Epoch, last: Epoch) -> Self {
        if first > last {
            panic!("tried to create negative epoch range {first}-{last}")
        }

        Self { first, last }
    }

    pub fn len(&self) -> i64 {
        self.last.0 - self.first.0 + 1
    }

    /// Deposits and withdrawals affect the balance one epoch after their inclusion. Looking one
    /// epoch back lines them up with the balances of the day. The first epoch never goes below
    /// genesis.
    pub fn shifted_back_one(&self) -> Self {
        let first = Epoch((self.first.0 - 1).max(0));
        let last = Epoch((self.last.0 - 1).max(first.0));
        Self { first, last }
    }

    /// Splits the range into consecutive inclusive sub ranges of at most `width` epochs that
    /// together cover exactly the original range.
    pub fn sub_ranges(&self, width: i64) -> Vec<EpochRange> {
        let width = width.max(1);
        let mut ranges = Vec::with_capacity((self.len() / width + 1) as usize);
        let mut first = self.first;
        while first <= self.last {
            let last = Epoch((first.0 + width - 1).min(self.last.0));
            ranges.push(EpochRange { first, last });
            first = last + 1;
        }
        ranges
    }
}

impl Display for EpochRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}
