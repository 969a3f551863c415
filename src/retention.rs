//! Deletion of records older than a cutoff.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{Error, Result};
use crate::models::DataRecord;
use crate::processor::DrainLock;
use crate::store::{Bucket, Store};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub deleted_count: usize,
    pub cutoff_time: DateTime<Utc>,
}

/// Parses an RFC 3339 cutoff. Missing or malformed input falls back to
/// `now - retention`, which fails if it is not a representable time.
pub fn resolve_cutoff(
    raw: Option<&str>,
    now: DateTime<Utc>,
    retention: Duration,
) -> Result<DateTime<Utc>> {
    if let Some(s) = raw.map(str::trim).filter(|s| !s.is_empty()) {
        match DateTime::parse_from_rfc3339(s) {
            Ok(parsed) => return Ok(parsed.with_timezone(&Utc)),
            Err(e) => debug!(cutoff = %s, error = %e, "unparseable cutoff, using default"),
        }
    }
    now.checked_sub_signed(retention)
        .ok_or_else(|| Error::Config(format!("retention period {} overflows the cutoff", retention)))
}

pub struct RetentionSweeper {
    store: Arc<Store>,
    drain_lock: DrainLock,
    retention: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<Store>, drain_lock: DrainLock, retention: Duration) -> Self {
        Self {
            store,
            drain_lock,
            retention,
        }
    }

    pub fn resolve_cutoff(&self, raw: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        resolve_cutoff(raw, now, self.retention)
    }

    /// Deletes every record whose timestamp is strictly before `cutoff`.
    ///
    /// Waits for any in-flight drain to finish first. Individual delete
    /// failures are logged and skipped.
    pub async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<SweepReport> {
        let _guard = self.drain_lock.lock().await;

        let mut expired = Vec::new();
        for (key, value) in self.store.scan_all(Bucket::Records).await? {
            match codec::decode::<DataRecord>(&value) {
                Ok(record) if record.timestamp < cutoff => expired.push(key),
                Ok(_) => {}
                Err(e) => warn!(record_id = %key, error = %e, "skipping undecodable record"),
            }
        }

        let mut deleted_count = 0;
        for key in expired {
            match self.store.delete(Bucket::Records, &key).await {
                Ok(true) => deleted_count += 1,
                Ok(false) => {}
                Err(e) => warn!(record_id = %key, error = %e, "failed to delete expired record"),
            }
        }

        info!(deleted_count, cutoff = %cutoff, "old records cleaned up");

        Ok(SweepReport {
            deleted_count,
            cutoff_time: cutoff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_pool;
    use crate::metrics::Metrics;
    use crate::processor::{BatchProcessor, Transform};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::{Mutex, Notify};

    async fn setup() -> (Arc<Store>, RetentionSweeper) {
        let store = Arc::new(Store::new(init_pool("sqlite::memory:").await.unwrap()));
        let sweeper = RetentionSweeper::new(
            Arc::clone(&store),
            Arc::new(Mutex::new(())),
            Duration::hours(24),
        );
        (store, sweeper)
    }

    async fn insert_aged(store: &Store, age: Duration) -> String {
        let record = DataRecord::with_timestamp("metric".into(), HashMap::new(), Utc::now() - age);
        store.put_doc(Bucket::Records, &record.id, &record).await.unwrap();
        record.id
    }

    #[tokio::test]
    async fn default_cutoff_removes_only_old_records() {
        let (store, sweeper) = setup().await;
        let old = insert_aged(&store, Duration::hours(48)).await;
        let recent = insert_aged(&store, Duration::hours(1)).await;

        let cutoff = sweeper.resolve_cutoff(None, Utc::now()).unwrap();
        let report = sweeper.sweep(cutoff).await.unwrap();

        assert_eq!(report.deleted_count, 1);
        assert_eq!(store.get(Bucket::Records, &old).await.unwrap(), None);
        assert!(store.get(Bucket::Records, &recent).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweeping_twice_is_idempotent() {
        let (store, sweeper) = setup().await;
        insert_aged(&store, Duration::hours(30)).await;
        let cutoff = Utc::now() - Duration::hours(24);

        assert_eq!(sweeper.sweep(cutoff).await.unwrap().deleted_count, 1);
        assert_eq!(sweeper.sweep(cutoff).await.unwrap().deleted_count, 0);
    }

    #[tokio::test]
    async fn record_exactly_at_cutoff_is_kept() {
        let (store, sweeper) = setup().await;
        let record = DataRecord::new("metric".into(), HashMap::new());
        store.put_doc(Bucket::Records, &record.id, &record).await.unwrap();

        let report = sweeper.sweep(record.timestamp).await.unwrap();
        assert_eq!(report.deleted_count, 0);
    }

    struct Gate {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Transform for Gate {
        async fn transform(&self, record: DataRecord) -> Result<DataRecord> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(record)
        }
    }

    #[tokio::test]
    async fn sweep_waits_for_in_flight_drain() {
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let store = Arc::new(Store::new(init_pool("sqlite::memory:").await.unwrap()));
        let processor = Arc::new(BatchProcessor::new(
            Arc::clone(&store),
            gate.clone(),
            Arc::new(Metrics::new()),
        ));
        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::clone(&store),
            processor.drain_lock(),
            Duration::hours(24),
        ));
        let old = insert_aged(&store, Duration::hours(48)).await;
        let recent = insert_aged(&store, Duration::hours(1)).await;

        let drain = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run(1).await })
        };
        gate.entered.notified().await;

        let sweep = {
            let sweeper = Arc::clone(&sweeper);
            let cutoff = Utc::now() - Duration::hours(24);
            tokio::spawn(async move { sweeper.sweep(cutoff).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!sweep.is_finished());

        gate.release.notify_one();
        assert_eq!(drain.await.unwrap().unwrap().processed, 1);

        let report = sweep.await.unwrap().unwrap();
        assert_eq!(report.deleted_count, 1);
        assert_eq!(store.get(Bucket::Records, &old).await.unwrap(), None);
        assert!(store.get(Bucket::Records, &recent).await.unwrap().is_some());
    }

    #[test]
    fn cutoff_parsing_falls_back_to_default() {
        let now = Utc::now();
        let day = Duration::hours(24);

        assert_eq!(resolve_cutoff(None, now, day).unwrap(), now - day);
        assert_eq!(resolve_cutoff(Some("not a date"), now, day).unwrap(), now - day);
        assert_eq!(resolve_cutoff(Some(""), now, day).unwrap(), now - day);

        let explicit = resolve_cutoff(Some("2024-03-01T12:00:00+02:00"), now, day).unwrap();
        assert_eq!(explicit.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn overflowing_default_cutoff_is_an_error() {
        let now = Utc::now();
        let huge = Duration::days(300_000 * 365);

        let err = resolve_cutoff(None, now, huge).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let explicit = resolve_cutoff(Some("2024-03-01T10:00:00Z"), now, huge).unwrap();
        assert_eq!(explicit.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }
}
