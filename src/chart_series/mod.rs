//! Network wide daily indicators, gas, fees, emission and market cap, computed from every
//! execution block of a calendar day. Independent of the per validator categories apart from
//! reading the day's summed consensus income for emission.

mod accumulator;
mod indicators;
mod store;
mod window;

use std::time::Instant;

use futures::{join, try_join, TryFutureExt};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::{
    beacon_chain::{Day, Slot},
    eth_prices::PriceFeed,
    execution_chain::{BlockNumber, BlockRange},
    indexer::{FullBlock, Indexer},
    validator_stats::{ensure_epochs_finalized, ledger, status, upsert, ExportContext, StatsError},
};

pub use accumulator::BlockTotals;
pub use indicators::Indicator;
pub use store::{ChartSeriesPoint, ChartSeriesStore};
pub use window::ChartDay;

use indicators::{indicator_values, IndicatorInputs};
use store::CHART_SERIES_TARGET;

async fn execution_block_at_or_after(
    db_pool: &PgPool,
    day: Day,
    slot: Slot,
) -> Result<BlockNumber, StatsError> {
    ledger::first_execution_block_at_or_after(db_pool, slot)
        .await?
        .ok_or_else(|| StatsError::UnexpectedValue {
            what: "missing execution block",
            value: slot.to_string(),
            context: format!("no canonical block at or after the slot, chart day {day}"),
        })
}

/// Feeds blocks, highest first, through a bounded channel into the accumulator. Fetching the
/// next chunk overlaps with accumulating the last one.
async fn stream_block_totals(
    indexer: &dyn Indexer,
    range: BlockRange,
    chunk_size: i64,
) -> Result<BlockTotals, StatsError> {
    let capacity = usize::try_from(chunk_size).unwrap_or(1).max(1);
    let (block_tx, mut block_rx) = mpsc::channel::<FullBlock>(capacity);

    let producer = async move {
        for chunk in range.descending_chunks(chunk_size) {
            let blocks = indexer
                .full_blocks_descending(chunk)
                .await
                .map_err(StatsError::Aggregation)?;
            debug!(%chunk, blocks = blocks.len(), "fetched blocks");

            for block in blocks {
                if block_tx.send(block).await.is_err() {
                    // Consumer stopped on an error of its own.
                    return Ok(());
                }
            }
        }

        Ok::<(), StatsError>(())
    };

    let consumer = async move {
        let mut totals = BlockTotals::default();
        while let Some(block) = block_rx.recv().await {
            totals.add_block(&block)?;
        }
        Ok::<BlockTotals, StatsError>(totals)
    };

    let (produced, totals) = join!(producer, consumer);
    produced?;
    let totals = totals?;

    if totals.block_count != range.count() {
        warn!(
            %range,
            expected = range.count(),
            got = totals.block_count,
            "indexer returned a different number of blocks"
        );
    }

    Ok(totals)
}

/// Computes and stores every indicator for the calendar day of `day`, then marks the day in
/// `chart_series_status`. Days that start at or before the activation block are rejected
/// without writing anything.
#[instrument(skip_all, fields(day = %day))]
pub async fn export_chart_series(
    ctx: &ExportContext<'_>,
    price_feed: &dyn PriceFeed,
    day: Day,
) -> Result<Vec<ChartSeriesPoint>, StatsError> {
    let start = Instant::now();
    let chart_day = ChartDay::new(day);

    ensure_epochs_finalized(&ctx.db.reader, day, &chart_day.epochs).await?;

    let first_block =
        execution_block_at_or_after(&ctx.db.reader, day, chart_day.first_slot).await?;
    if first_block <= ctx.config.activation_block {
        return Err(StatsError::BeforeActivation {
            day,
            first_block,
            activation_block: ctx.config.activation_block,
        });
    }

    let end_block =
        execution_block_at_or_after(&ctx.db.reader, day, chart_day.end_slot).await?;
    if end_block <= first_block {
        return Err(StatsError::UnexpectedValue {
            what: "block range",
            value: format!("{first_block}-{end_block}"),
            context: format!("chart day {day} spans no blocks"),
        });
    }
    let range = BlockRange::new(first_block, end_block - 1);
    debug!(%range, first_slot = %chart_day.first_slot, "resolved block range");

    let totals =
        stream_block_totals(ctx.indexer, range, ctx.config.chart_block_batch_size).await?;

    let day_status = status::get_status(&ctx.db.writer, day).await?;
    if !day_status.cl_rewards_exported {
        warn!("consensus rewards not exported yet, emission misses consensus income");
    }

    let store = ChartSeriesStore::new(&ctx.db.writer);
    let (consensus_rewards, previous_total_emission, eth_price_usd) = try_join!(
        ledger::consensus_rewards_sum_for_day(&ctx.db.writer, day).map_err(StatsError::from),
        store
            .last_total_emission(chart_day.time)
            .map_err(StatsError::from),
        price_feed.eth_price("USD").map_err(StatsError::Aggregation),
    )?;

    let points: Vec<ChartSeriesPoint> = indicator_values(&IndicatorInputs {
        totals: &totals,
        consensus_rewards,
        previous_total_emission: &previous_total_emission,
        eth_price_usd: &eth_price_usd,
        genesis_supply_eth: &ctx.config.genesis_supply_eth,
    })
    .into_iter()
    .map(|(indicator, value)| ChartSeriesPoint {
        time: chart_day.time,
        indicator,
        value,
    })
    .collect();

    upsert::upsert_rows_atomically(
        ctx.batch_writer(),
        &CHART_SERIES_TARGET,
        &points,
        ctx.config.upsert_batch_size,
    )
    .await?;

    store.mark_day_exported(day).await?;

    info!(
        %range,
        blocks = totals.block_count,
        txs = totals.tx_count,
        points = points.len(),
        took = ?start.elapsed(),
        "exported chart series"
    );

    Ok(points)
}
