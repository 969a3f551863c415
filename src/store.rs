//! Bucketed key/value storage on top of SQLite.
//!
//! Each [`Bucket`] is an independent table of `key -> value` blobs. Reads
//! run inside their own transaction so a scan sees one consistent snapshot;
//! writes go through a [`WriteTxn`] that also holds the bucket's writer lock
//! until it commits or is dropped.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures_util::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::codec;
use crate::db::DbPool;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Records,
    Jobs,
}

impl Bucket {
    pub const ALL: [Bucket; 2] = [Bucket::Records, Bucket::Jobs];

    pub fn table(self) -> &'static str {
        match self {
            Bucket::Records => "records",
            Bucket::Jobs => "jobs",
        }
    }

    fn index(self) -> usize {
        match self {
            Bucket::Records => 0,
            Bucket::Jobs => 1,
        }
    }
}

pub struct Store {
    pool: DbPool,
    writers: [Arc<Mutex<()>>; 2],
}

impl Store {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            writers: [Arc::new(Mutex::new(())), Arc::new(Mutex::new(()))],
        }
    }

    /// Point lookup. A missing key is `Ok(None)`, not an error.
    pub async fn get(&self, bucket: Bucket, key: &str) -> Result<Option<Vec<u8>>> {
        let sql = format!("SELECT value FROM {} WHERE key = ?", bucket.table());

        let mut tx = self.pool.begin().await?;
        let row: Option<(Vec<u8>,)> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(row.map(|(value,)| value))
    }

    pub async fn put(&self, bucket: Bucket, key: &str, value: &[u8]) -> Result<()> {
        let mut txn = self.begin_write(bucket).await?;
        txn.put(key, value).await?;
        txn.commit().await
    }

    /// Removes `key`, returning whether it existed. Absent keys are a no-op.
    pub async fn delete(&self, bucket: Bucket, key: &str) -> Result<bool> {
        let mut txn = self.begin_write(bucket).await?;
        let existed = txn.delete(key).await?;
        txn.commit().await?;
        Ok(existed)
    }

    /// Full forward scan in key order over one snapshot.
    pub async fn scan_all(&self, bucket: Bucket) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::new();
        self.scan_while(bucket, |key, value| {
            entries.push((key.to_string(), value.to_vec()));
            ControlFlow::Continue(())
        })
        .await?;
        Ok(entries)
    }

    /// Visits entries in key order until `visit` breaks or the bucket ends.
    pub async fn scan_while<F>(&self, bucket: Bucket, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &[u8]) -> ControlFlow<()>,
    {
        let sql = format!("SELECT key, value FROM {} ORDER BY key", bucket.table());

        let mut tx = self.pool.begin().await?;
        {
            let mut rows = sqlx::query_as::<_, (String, Vec<u8>)>(&sql).fetch(&mut *tx);
            while let Some((key, value)) = rows.try_next().await? {
                if visit(&key, &value).is_break() {
                    break;
                }
            }
        }
        tx.commit().await?;

        Ok(())
    }

    pub async fn count(&self, bucket: Bucket) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", bucket.table());
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    /// Starts a write transaction. The bucket's writer lock is taken before a
    /// connection is checked out so waiting writers never pin a connection.
    pub async fn begin_write(&self, bucket: Bucket) -> Result<WriteTxn> {
        let guard = Arc::clone(&self.writers[bucket.index()]).lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTxn {
            bucket,
            tx,
            _guard: guard,
        })
    }

    pub async fn get_doc<T: DeserializeOwned>(&self, bucket: Bucket, key: &str) -> Result<Option<T>> {
        match self.get(bucket, key).await? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put_doc<T: Serialize>(&self, bucket: Bucket, key: &str, entity: &T) -> Result<()> {
        let bytes = codec::encode(entity)?;
        self.put(bucket, key, &bytes).await
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// A write transaction on a single bucket. Dropping it without calling
/// [`WriteTxn::commit`] rolls every change back.
pub struct WriteTxn {
    bucket: Bucket,
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl WriteTxn {
    pub async fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            self.bucket.table()
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn delete(&mut self, key: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE key = ?", self.bucket.table());
        let result = sqlx::query(&sql)
            .bind(key)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
