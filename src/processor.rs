//! Bounded draining of pending records.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::models::DataRecord;
use crate::store::{Bucket, Store};

/// Exclusive access to the pending backlog, shared by the processor and the
/// retention sweeper.
pub type DrainLock = Arc<Mutex<()>>;

/// Per-record work applied before a record is marked processed.
///
/// Implementations must be deterministic over the record's content; the
/// processor owns the pending/processed transition.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn transform(&self, record: DataRecord) -> Result<DataRecord>;
}

/// Returns the record untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl Transform for Passthrough {
    async fn transform(&self, record: DataRecord) -> Result<DataRecord> {
        Ok(record)
    }
}

/// Stands in for real work by sleeping a random duration in `[min, max)`.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedWork {
    min: Duration,
    max: Duration,
}

impl SimulatedWork {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }
}

#[async_trait]
impl Transform for SimulatedWork {
    async fn transform(&self, record: DataRecord) -> Result<DataRecord> {
        let delay = if self.max > self.min {
            rand::thread_rng().gen_range(self.min..self.max)
        } else {
            self.min
        };
        tokio::time::sleep(delay).await;
        Ok(record)
    }
}

/// Outcome of one processor invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// Pending records picked by the selection scan.
    pub selected: usize,
    pub processed: usize,
    /// Records that could not be transformed or written back.
    pub failed: usize,
    /// Set when another drain held the lock and this invocation did nothing.
    pub skipped: bool,
    pub elapsed: Duration,
}

impl BatchReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

pub struct BatchProcessor {
    store: Arc<Store>,
    transform: Arc<dyn Transform>,
    metrics: Arc<Metrics>,
    drain_lock: DrainLock,
}

impl BatchProcessor {
    pub fn new(store: Arc<Store>, transform: Arc<dyn Transform>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            transform,
            metrics,
            drain_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn drain_lock(&self) -> DrainLock {
        Arc::clone(&self.drain_lock)
    }

    /// Processes up to `batch_size` pending records in key order.
    ///
    /// Only one drain runs at a time; if one is already in flight this
    /// returns a skipped report immediately. An error means the selection
    /// itself failed and nothing was processed. Failures on individual
    /// records are counted in the report instead.
    pub async fn run(&self, batch_size: usize) -> Result<BatchReport> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!(batch_size, "drain already in flight, skipping");
            let report = BatchReport::skipped();
            self.metrics.observe_batch(&report);
            return Ok(report);
        };

        let started = Instant::now();
        let batch = self.select_pending(batch_size).await?;
        if batch.is_empty() {
            let report = BatchReport {
                elapsed: started.elapsed(),
                ..BatchReport::default()
            };
            self.metrics.observe_batch(&report);
            return Ok(report);
        }

        let mut report = BatchReport {
            selected: batch.len(),
            ..BatchReport::default()
        };

        for record in batch {
            let record_id = record.id.clone();
            match self.process_one(record).await {
                Ok(()) => report.processed += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(record_id = %record_id, error = %e, "failed to process record, skipping");
                }
            }
        }

        report.elapsed = started.elapsed();
        self.metrics.observe_batch(&report);

        if report.failed > 0 {
            warn!(
                processed = report.processed,
                failed = report.failed,
                "batch finished with partial failures"
            );
        } else {
            info!(
                processed = report.processed,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "batch processed"
            );
        }

        Ok(report)
    }

    async fn select_pending(&self, batch_size: usize) -> Result<Vec<DataRecord>> {
        let mut batch = Vec::with_capacity(batch_size);
        if batch_size == 0 {
            return Ok(batch);
        }

        self.store
            .scan_while(Bucket::Records, |key, value| {
                match codec::decode::<DataRecord>(value) {
                    Ok(record) if record.is_pending() => batch.push(record),
                    Ok(_) => {}
                    Err(e) => warn!(record_id = %key, error = %e, "skipping undecodable record"),
                }
                if batch.len() >= batch_size {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await?;

        Ok(batch)
    }

    async fn process_one(&self, record: DataRecord) -> Result<()> {
        let started = Instant::now();
        let key = record.id.clone();
        let record_type = record.record_type.clone();

        let mut record = self.transform.transform(record).await?;
        record.mark_processed(Utc::now());
        self.store.put_doc(Bucket::Records, &key, &record).await?;

        let elapsed = started.elapsed();
        self.metrics.observe_record(&record_type, elapsed);
        debug!(
            record_id = %key,
            record_type = %record_type,
            processing_time = elapsed.as_secs_f64(),
            "record processed"
        );

        Ok(())
    }
}
