//! Point-in-time processing metrics.
//!
//! Nothing here is pushed anywhere; a reporter pulls snapshots.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::processor::BatchReport;

/// Upper bounds, in seconds, of the processing duration buckets.
pub const DURATION_BUCKETS: [f64; 7] = [0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0];

/// Record counts as served by the metrics endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataMetrics {
    pub total_records: u64,
    pub processed_records: u64,
    pub pending_records: u64,
    pub processing_rate_per_second: f64,
    pub data_size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum_seconds: f64,
    /// Cumulative counts aligned with [`DURATION_BUCKETS`].
    pub buckets: Vec<u64>,
}

#[derive(Debug, Default)]
struct Histogram {
    count: u64,
    sum: f64,
    buckets: [u64; DURATION_BUCKETS.len()],
}

impl Histogram {
    fn observe(&mut self, seconds: f64) {
        self.count += 1;
        self.sum += seconds;
        for (bound, slot) in DURATION_BUCKETS.iter().zip(self.buckets.iter_mut()) {
            if seconds <= *bound {
                *slot += 1;
            }
        }
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: self.count,
            sum_seconds: self.sum,
            buckets: self.buckets.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingSnapshot {
    pub records_processed_total: u64,
    pub records_failed_total: u64,
    pub batches_total: u64,
    pub batches_skipped_total: u64,
    pub last_batch: Option<BatchReport>,
    pub record_durations: BTreeMap<String, HistogramSnapshot>,
    pub batch_durations: HistogramSnapshot,
}

#[derive(Debug)]
pub struct Metrics {
    started: Instant,
    processed_total: AtomicU64,
    failed_total: AtomicU64,
    batches_total: AtomicU64,
    batches_skipped: AtomicU64,
    last_batch: RwLock<Option<BatchReport>>,
    record_durations: RwLock<HashMap<String, Histogram>>,
    batch_durations: RwLock<Histogram>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            processed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            batches_total: AtomicU64::new(0),
            batches_skipped: AtomicU64::new(0),
            last_batch: RwLock::new(None),
            record_durations: RwLock::new(HashMap::new()),
            batch_durations: RwLock::new(Histogram::default()),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn observe_record(&self, record_type: &str, elapsed: Duration) {
        if let Ok(mut guard) = self.record_durations.write() {
            guard
                .entry(record_type.to_string())
                .or_default()
                .observe(elapsed.as_secs_f64());
        }
    }

    pub fn observe_batch(&self, report: &BatchReport) {
        if report.skipped {
            self.batches_skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.batches_total.fetch_add(1, Ordering::Relaxed);
        self.processed_total
            .fetch_add(report.processed as u64, Ordering::Relaxed);
        self.failed_total
            .fetch_add(report.failed as u64, Ordering::Relaxed);

        if let Ok(mut guard) = self.batch_durations.write() {
            guard.observe(report.elapsed.as_secs_f64());
        }
        if let Ok(mut guard) = self.last_batch.write() {
            *guard = Some(report.clone());
        }
    }

    pub fn processing(&self) -> ProcessingSnapshot {
        let record_durations = self
            .record_durations
            .read()
            .map(|g| g.iter().map(|(k, h)| (k.clone(), h.snapshot())).collect())
            .unwrap_or_default();

        ProcessingSnapshot {
            records_processed_total: self.processed_total.load(Ordering::Relaxed),
            records_failed_total: self.failed_total.load(Ordering::Relaxed),
            batches_total: self.batches_total.load(Ordering::Relaxed),
            batches_skipped_total: self.batches_skipped.load(Ordering::Relaxed),
            last_batch: self.last_batch.read().ok().and_then(|g| g.clone()),
            record_durations,
            batch_durations: self
                .batch_durations
                .read()
                .map(|g| g.snapshot())
                .unwrap_or_default(),
        }
    }

    /// Builds the record-count gauges from counts taken in one scan.
    pub fn data_metrics(&self, processed: u64, pending: u64, size_bytes: u64) -> DataMetrics {
        let uptime = self.uptime().as_secs_f64();
        let rate = if uptime > 0.0 {
            processed as f64 / uptime
        } else {
            0.0
        };

        DataMetrics {
            total_records: processed + pending,
            processed_records: processed,
            pending_records: pending,
            processing_rate_per_second: rate,
            data_size_bytes: size_bytes,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
