pub mod beacon_chain;
pub mod caching;
pub mod chart_series;
pub mod config;
pub mod db;
pub mod env;
pub mod eth_prices;
pub mod execution_chain;
pub mod indexer;
pub mod log;
pub mod relays;
pub mod units;
pub mod validator_stats;

pub use chart_series::export_chart_series;
pub use validator_stats::{export_day, income_history, ExportContext, StatsError};
