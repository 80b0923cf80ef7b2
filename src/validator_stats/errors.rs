use std::time::Duration;

use thiserror::Error;

use crate::{beacon_chain::Day, execution_chain::BlockNumber};

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("day {day} is not finalized yet, {finalized} of {expected} epochs finalized")]
    NotFinalized {
        day: Day,
        finalized: i64,
        expected: i64,
    },
    #[error("day {day} is missing required exports: {}", missing.join(", "))]
    DependencyMissing { day: Day, missing: Vec<String> },
    #[error("failed to persist statistics")]
    Persistence(#[from] sqlx::Error),
    #[error("failed to aggregate statistics")]
    Aggregation(#[source] anyhow::Error),
    #[error("{stage} did not finish within {deadline:?}")]
    DeadlineExceeded {
        stage: &'static str,
        deadline: Duration,
    },
    #[error("day {day} starts at block {first_block}, at or before activation block {activation_block}")]
    BeforeActivation {
        day: Day,
        first_block: BlockNumber,
        activation_block: BlockNumber,
    },
    #[error("unexpected {what} {value} in {context}")]
    UnexpectedValue {
        what: &'static str,
        value: String,
        context: String,
    },
}

impl StatsError {
    /// Whether running the same stage again later can succeed without anything else changing.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StatsError::NotFinalized { .. } | StatsError::DeadlineExceeded { .. }
        )
    }
}
