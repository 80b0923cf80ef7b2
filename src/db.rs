use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::env::EnvConfig;

pub fn url_with_name(url: &str, name: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}application_name={name}")
}

async fn connect(url: &str, name: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&url_with_name(url, name))
        .await
        .with_context(|| format!("failed to connect to db as {name}"))
}

/// Writes go to the primary, aggregate reads over ledger tables go to the replica. Without a
/// replica configured both point at the primary.
#[derive(Clone, Debug)]
pub struct DbPools {
    pub writer: PgPool,
    pub reader: PgPool,
}

impl DbPools {
    pub async fn connect(env_config: &EnvConfig, name: &str, max_connections: u32) -> Result<Self> {
        let writer = connect(&env_config.db_url, name, max_connections).await?;
        let reader = if env_config.db_reader_url == env_config.db_url {
            writer.clone()
        } else {
            connect(&env_config.db_reader_url, name, max_connections).await?
        };

        Ok(Self { writer, reader })
    }

    pub fn single(pool: PgPool) -> Self {
        Self {
            writer: pool.clone(),
            reader: pool,
        }
    }
}

#[cfg(test)]
pub mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sqlx::{Connection, PgConnection};
    use test_context::AsyncTestContext;

    use super::*;

    fn get_test_db_url() -> String {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL to be set for db tests");
        if !url.contains("testdb") {
            panic!("tried to run tests against db that is not 'testdb'");
        }

        url
    }

    async fn get_test_db_connection() -> PgConnection {
        PgConnection::connect(&get_test_db_url()).await.unwrap()
    }

    static DB_ID_COUNTER: AtomicUsize = AtomicUsize::new(1);

    fn get_id() -> usize {
        DB_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    /// A freshly migrated database per test, dropped again on teardown.
    pub struct TestDb {
        pub pool: PgPool,
        name: String,
    }

    impl TestDb {
        pub async fn new() -> Self {
            let name = format!("testdb_{}_{}", std::process::id(), get_id());

            let mut connection = get_test_db_connection().await;
            sqlx::query(&format!("CREATE DATABASE {name}"))
                .execute(&mut connection)
                .await
                .unwrap();

            let pool = PgPoolOptions::new()
                .max_connections(4)
                .connect(&get_test_db_url().replace("testdb", &name))
                .await
                .unwrap();

            sqlx::migrate!("./migrations").run(&pool).await.unwrap();

            Self { pool, name }
        }

        pub fn pools(&self) -> DbPools {
            DbPools::single(self.pool.clone())
        }

        pub async fn cleanup(self) {
            self.pool.close().await;
            let mut connection = get_test_db_connection().await;
            sqlx::query(&format!("DROP DATABASE {} WITH (FORCE)", self.name))
                .execute(&mut connection)
                .await
                .unwrap();
        }
    }

    impl AsyncTestContext for TestDb {
        async fn setup() -> Self {
            TestDb::new().await
        }

        async fn teardown(self) {
            self.cleanup().await;
        }
    }

    #[test]
    fn url_with_name_test() {
        assert_eq!(
            url_with_name("postgres://localhost/stats", "cli"),
            "postgres://localhost/stats?application_name=cli"
        );
        assert_eq!(
            url_with_name("postgres://localhost/stats?sslmode=disable", "cli"),
            "postgres://localhost/stats?sslmode=disable&application_name=cli"
        );
    }
}
