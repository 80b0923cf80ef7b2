use anyhow::{bail, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use mockall::automock;
use sqlx::{FromRow, PgPool, Postgres};

#[derive(Clone, Debug, FromRow, PartialEq)]
pub struct EthPrice {
    pub timestamp: DateTime<Utc>,
    pub usd: BigDecimal,
}

#[automock]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Most recent price of one ETH in the given currency.
    async fn eth_price(&self, currency: &str) -> Result<BigDecimal>;
}

pub struct PriceFeedPostgres {
    db_pool: PgPool,
}

impl PriceFeedPostgres {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    async fn most_recent_price(&self) -> Result<Option<EthPrice>> {
        let price = sqlx::query_as::<Postgres, EthPrice>(
            "
            SELECT
                timestamp, ethusd::NUMERIC AS usd
            FROM
                eth_prices
            ORDER BY timestamp DESC
            LIMIT 1
            ",
        )
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(price)
    }
}

#[async_trait]
impl PriceFeed for PriceFeedPostgres {
    async fn eth_price(&self, currency: &str) -> Result<BigDecimal> {
        if !currency.eq_ignore_ascii_case("usd") {
            bail!("no eth price feed for currency {currency}");
        }

        match self.most_recent_price().await? {
            Some(price) => Ok(price.usd),
            None => bail!("no eth price stored yet"),
        }
    }
}
