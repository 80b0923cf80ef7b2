//! Opportunistic result cache on top of the `key_value_store` table. Nothing depends on a hit,
//! a miss only costs freshness.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use mockall::automock;
use serde_json::Value;
use sqlx::{types::Json, FromRow, PgPool, Postgres};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

/// Entries carry no expiry of their own. Writes stamp the time, readers pass the ttl they accept
/// and anything older counts as a miss.
#[automock]
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// The cached value, if one was stored less than `max_age` ago.
    async fn get_with_timeout(&self, key: &str, max_age: Duration) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

#[derive(FromRow)]
struct KeyValueRow {
    value: Json<Value>,
}

pub struct KeyValueCache {
    db_pool: PgPool,
}

impl KeyValueCache {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl ResultCache for KeyValueCache {
    async fn get_with_timeout(&self, key: &str, max_age: Duration) -> Result<Option<Value>> {
        let oldest_allowed = Utc::now() - chrono::Duration::from_std(max_age)?;

        let row = sqlx::query_as::<Postgres, KeyValueRow>(
            "
            SELECT value
            FROM key_value_store
            WHERE key = $1
            AND updated_at >= $2
            ",
        )
        .bind(key)
        .bind(oldest_allowed)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(row.map(|row| row.value.0))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        sqlx::query(
            "
            INSERT INTO key_value_store (key, value, updated_at) VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            ",
        )
        .bind(key)
        .bind(Json(value))
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}

#[derive(Debug)]
struct CacheWrite {
    key: String,
    value: Value,
}

/// Background writer for cache entries. Callers hand off a value and move on, failed writes
/// are logged and counted by the worker instead of vanishing with a detached task.
pub struct CacheWriteQueue {
    sender: mpsc::UnboundedSender<CacheWrite>,
    worker: JoinHandle<usize>,
}

impl CacheWriteQueue {
    pub fn spawn(cache: Arc<dyn ResultCache>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<CacheWrite>();

        let worker = tokio::spawn(async move {
            let mut failed_writes = 0;
            while let Some(write) = receiver.recv().await {
                match cache.set(&write.key, write.value).await {
                    Ok(()) => debug!(key = %write.key, "stored cache entry"),
                    Err(e) => {
                        failed_writes += 1;
                        error!(key = %write.key, "failed to store cache entry: {e:#}");
                    }
                }
            }
            failed_writes
        });

        Self { sender, worker }
    }

    pub fn submit(&self, key: String, value: Value) {
        if self.sender.send(CacheWrite { key, value }).is_err() {
            warn!("cache write queue closed, dropping cache entry");
        }
    }

    /// Drains outstanding writes and returns how many of them failed.
    pub async fn shutdown(self) -> usize {
        drop(self.sender);
        match self.worker.await {
            Ok(failed_writes) => failed_writes,
            Err(e) => {
                error!("cache write worker panicked: {e}");
                0
            }
        }
    }
}
