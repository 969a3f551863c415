use std::str::FromStr;
use std::time::Duration;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};

use crate::store::Bucket;

pub type DbPool = Pool<Sqlite>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(1);

pub fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Opens the single pool used for the lifetime of the process and creates
/// every bucket table. On failure the partially opened pool is closed
/// before the error is returned.
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let pool = connect(database_url).await?;

    if let Err(err) = create_buckets(&pool).await {
        pool.close().await;
        return Err(err);
    }

    Ok(pool)
}

async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT);

    if is_in_memory(database_url) {
        // Every connection to `:memory:` is its own database, so keep exactly
        // one connection alive for as long as the pool exists.
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
    } else {
        SqlitePoolOptions::new()
            .connect_with(options.journal_mode(SqliteJournalMode::Wal))
            .await
    }
}

async fn create_buckets(pool: &DbPool) -> Result<(), sqlx::Error> {
    for bucket in Bucket::ALL {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            )
            "#,
            bucket.table()
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}
