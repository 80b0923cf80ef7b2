//! Bribes paid to proposers through MEV relays, stored per delivered payload in `mev_blocks`.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mockall::automock;
use sqlx::{FromRow, PgPool, Postgres};

use crate::{execution_chain::BlockHash, units::WeiNewtype};

#[derive(Debug, FromRow)]
struct RelayBidRow {
    block_hash: String,
    bid_wei: String,
}

#[automock]
#[async_trait]
pub trait RelayData: Send + Sync {
    /// Bribe per block hash, for those of the given blocks that were delivered by a relay.
    async fn relay_data_for_blocks(
        &self,
        block_hashes: &[BlockHash],
    ) -> Result<HashMap<BlockHash, WeiNewtype>>;
}

pub struct RelayDataPostgres {
    db_pool: PgPool,
}

impl RelayDataPostgres {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl RelayData for RelayDataPostgres {
    async fn relay_data_for_blocks(
        &self,
        block_hashes: &[BlockHash],
    ) -> Result<HashMap<BlockHash, WeiNewtype>> {
        if block_hashes.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<Postgres, RelayBidRow>(
            "
            SELECT block_hash, bid_wei::TEXT AS bid_wei
            FROM mev_blocks
            WHERE block_hash = ANY($1)
            ",
        )
        .bind(block_hashes)
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let bid = row
                    .bid_wei
                    .parse::<WeiNewtype>()
                    .with_context(|| format!("invalid bid {} for {}", row.bid_wei, row.block_hash))?;
                Ok((row.block_hash, bid))
            })
            .collect()
    }
}
