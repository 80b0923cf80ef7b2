use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context};
use backoff::ExponentialBackoff;
use clap::{Parser, Subcommand};
use pit_wall::Progress;
use tracing::{debug, info, warn};

use validator_stats::{
    beacon_chain::{Day, ValidatorIndex},
    caching::{CacheWriteQueue, KeyValueCache, ResultCache},
    chart_series::{export_chart_series, ChartSeriesStore},
    config::PipelineConfig,
    db::DbPools,
    env::EnvConfig,
    eth_prices::{PriceFeed, PriceFeedPostgres},
    indexer::IndexerHttp,
    log,
    relays::RelayDataPostgres,
    validator_stats::{
        export_day, income_history, ledger, status, ExportContext, ExportStatus,
        IncomeHistorySources, StatsError,
    },
};

const APPLICATION_NAME: &str = "validator-stats-cli";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export every statistics category for one day.
    ExportDay {
        #[clap(long)]
        day: i32,
    },
    /// Export an inclusive range of days, in order, stopping at the first failure.
    ExportDays {
        #[clap(long)]
        start: i32,
        #[clap(long)]
        end: i32,
    },
    /// Export the network wide chart indicators for one day.
    ExportChartSeries {
        #[clap(long)]
        day: i32,
    },
    /// Print per day consensus income for a set of validators as JSON.
    IncomeHistory {
        /// Comma separated validator indices.
        #[clap(long, value_delimiter = ',', required = true)]
        indices: Vec<ValidatorIndex>,
        #[clap(long, default_value_t = 0)]
        lower: i32,
        /// Leave out to include an estimate for the day in progress.
        #[clap(long)]
        upper: Option<i32>,
        #[clap(long, default_value_t = 1)]
        chain_id: u64,
    },
    /// Keep exporting the day after the last exported one, waiting for finalization as needed.
    Follow {
        /// Seconds to wait when the next day is not finalized yet.
        #[clap(long, default_value_t = 300)]
        interval: u64,
    },
}

fn retry_policy() -> ExponentialBackoff {
    ExponentialBackoff {
        max_elapsed_time: Some(Duration::from_secs(30 * 60)),
        ..ExponentialBackoff::default()
    }
}

async fn export_day_with_retry(
    ctx: &ExportContext<'_>,
    day: Day,
) -> Result<ExportStatus, StatsError> {
    backoff::future::retry(retry_policy(), || async {
        export_day(ctx, day).await.map_err(|err| {
            if err.is_retryable() {
                info!(%day, %err, "export not possible yet, retrying");
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            }
        })
    })
    .await
}

/// Chart series never hold up the validator statistics, failures are logged and the day is
/// picked up again by a manual export.
async fn export_chart_series_if_missing(
    ctx: &ExportContext<'_>,
    price_feed: &dyn PriceFeed,
    day: Day,
) -> anyhow::Result<()> {
    if ChartSeriesStore::new(&ctx.db.writer)
        .is_day_exported(day)
        .await?
    {
        debug!(%day, "chart series already exported");
        return Ok(());
    }

    match export_chart_series(ctx, price_feed, day).await {
        Ok(_) => (),
        Err(StatsError::BeforeActivation { .. }) => {
            debug!(%day, "day precedes fee burning, no chart series");
        }
        Err(err) => warn!(%day, "failed to export chart series: {err:#}"),
    }

    Ok(())
}

async fn export_days(ctx: &ExportContext<'_>, start: Day, end: Day) -> anyhow::Result<()> {
    if start > end {
        bail!("start day {start} is after end day {end}");
    }

    let mut progress = Progress::new("export-days", (end.0 - start.0 + 1) as u64);
    let mut day = start;
    while day <= end {
        export_day(ctx, day)
            .await
            .with_context(|| format!("failed to export day {day}"))?;
        progress.inc_work_done();
        info!("{}", progress.get_progress_string());
        day = day.next();
    }

    Ok(())
}

async fn follow(
    ctx: &ExportContext<'_>,
    price_feed: &dyn PriceFeed,
    interval: Duration,
) -> anyhow::Result<()> {
    loop {
        let next_day = status::last_exported_day(&ctx.db.writer)
            .await?
            .map_or(Day::GENESIS, |day| day.next());

        match export_day_with_retry(ctx, next_day).await {
            Ok(_) => {
                info!(day = %next_day, "followed to day");
                export_chart_series_if_missing(ctx, price_feed, next_day).await?;
            }
            Err(err) if err.is_retryable() => {
                info!(day = %next_day, %err, "waiting before trying again");
                tokio::time::sleep(interval).await;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to export day {next_day}"));
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    log::init();

    let cli = Cli::parse();

    let env_config = EnvConfig::from_env()?;
    let config = PipelineConfig::from_env()?;
    let max_connections = (config.worker_concurrency + 2) as u32;
    let db = DbPools::connect(&env_config, APPLICATION_NAME, max_connections).await?;

    let indexer = IndexerHttp::new(&env_config.indexer_url);
    let relays = RelayDataPostgres::new(db.reader.clone());
    let price_feed = PriceFeedPostgres::new(db.reader.clone());
    let ctx = ExportContext::new(&db, &indexer, &relays, &config);

    match cli.command {
        Commands::ExportDay { day } => {
            let status = export_day(&ctx, Day(day)).await?;
            info!(?status, "done");
        }
        Commands::ExportDays { start, end } => {
            export_days(&ctx, Day(start), Day(end)).await?;
        }
        Commands::ExportChartSeries { day } => {
            let points = export_chart_series(&ctx, &price_feed, Day(day)).await?;
            info!(points = points.len(), "done");
        }
        Commands::IncomeHistory {
            indices,
            lower,
            upper,
            chain_id,
        } => {
            let last_finalized_epoch = ledger::last_finalized_epoch(&db.reader)
                .await?
                .context("no finalized epoch stored yet")?;

            let cache: Arc<dyn ResultCache> = Arc::new(KeyValueCache::new(db.writer.clone()));
            let cache_writes = CacheWriteQueue::spawn(cache.clone());
            let sources = IncomeHistorySources {
                db_pool: &db.reader,
                indexer: &indexer,
                cache: cache.as_ref(),
                cache_writes: &cache_writes,
                chain_id,
            };

            let history = income_history(
                &sources,
                &indices,
                Day(lower),
                upper.map(Day),
                last_finalized_epoch,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&history)?);

            let failed_writes = cache_writes.shutdown().await;
            if failed_writes > 0 {
                warn!(failed_writes, "some cache writes failed");
            }
        }
        Commands::Follow { interval } => {
            follow(&ctx, &price_feed, Duration::from_secs(interval)).await?;
        }
    }

    Ok(())
}
