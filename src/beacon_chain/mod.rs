mod day;
mod units;

pub use day::Day;
pub use day::EpochRange;

pub use units::Epoch;
pub use units::Slot;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;

pub const SLOTS_PER_EPOCH: i64 = 32;
pub const EPOCHS_PER_DAY: i64 = 24 * 60 * 60 / Slot::SECONDS_PER_SLOT / SLOTS_PER_EPOCH;

pub type ValidatorIndex = i32;

lazy_static! {
    pub static ref GENESIS_TIMESTAMP: DateTime<Utc> = "2020-12-01T12:00:23Z".parse().unwrap();
}
