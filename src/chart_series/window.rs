use chrono::{DateTime, Duration, Utc};

use crate::beacon_chain::{Day, EpochRange, Slot, EPOCHS_PER_DAY, SLOTS_PER_EPOCH};

const SECONDS_PER_CALENDAR_DAY: i64 = 24 * 60 * 60;

/// The slots a chart series day covers. Unlike validator statistics, chart points are keyed by
/// calendar date: the window starts at the first epoch boundary at or before UTC midnight of
/// the date the day's first epoch falls on, and spans one day worth of epochs from there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChartDay {
    pub day: Day,
    /// UTC midnight, the time every point of the day is stored under.
    pub time: DateTime<Utc>,
    pub first_slot: Slot,
    /// Exclusive.
    pub end_slot: Slot,
    pub epochs: EpochRange,
}

impl ChartDay {
    pub fn new(day: Day) -> Self {
        let epoch_time = day.epoch_range().first.date_time();
        let since_midnight = epoch_time.timestamp().rem_euclid(SECONDS_PER_CALENDAR_DAY);
        let time = epoch_time - Duration::seconds(since_midnight);

        let first_epoch = Slot::from_date_time_rounded_down(&time).epoch();
        let first_slot = first_epoch.first_slot();

        Self {
            day,
            time,
            first_slot,
            end_slot: first_slot + EPOCHS_PER_DAY * SLOTS_PER_EPOCH,
            epochs: EpochRange::new(first_epoch, first_epoch + (EPOCHS_PER_DAY - 1)),
        }
    }
}
