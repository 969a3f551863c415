//! The data service: one store handle and every worker that touches it.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::codec;
use crate::config::Config;
use crate::db;
use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::jobs::JobCoordinator;
use crate::metrics::{DataMetrics, Metrics, ProcessingSnapshot};
use crate::models::{DataRecord, NewRecord, ProcessingJob};
use crate::processor::{BatchProcessor, BatchReport, SimulatedWork, Transform};
use crate::retention::{RetentionSweeper, SweepReport};
use crate::scheduler::BatchTicker;
use crate::store::{Bucket, Store};

pub struct DataService {
    config: Config,
    store: Arc<Store>,
    metrics: Arc<Metrics>,
    processor: Arc<BatchProcessor>,
    jobs: JobCoordinator,
    sweeper: RetentionSweeper,
    generator: Generator,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl DataService {
    /// Opens the store and wires every component with the simulated
    /// per-record work configured in `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let transform = Arc::new(SimulatedWork::new(
            config.processing_delay_min,
            config.processing_delay_max,
        ));
        Self::open_with_transform(config, transform).await
    }

    pub async fn open_with_transform(config: Config, transform: Arc<dyn Transform>) -> Result<Self> {
        config.validate()?;
        let retention = config.retention()?;

        let pool = db::init_pool(&config.database_url).await?;
        let store = Arc::new(Store::new(pool));
        let metrics = Arc::new(Metrics::new());
        let tracker = TaskTracker::new();

        let processor = Arc::new(BatchProcessor::new(
            Arc::clone(&store),
            transform,
            Arc::clone(&metrics),
        ));
        let jobs = JobCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&processor),
            config.job_batch_size,
            tracker.clone(),
        );
        let sweeper = RetentionSweeper::new(Arc::clone(&store), processor.drain_lock(), retention);
        let generator = Generator::new(Arc::clone(&store), config.generator.clone(), tracker.clone());

        Ok(Self {
            config,
            store,
            metrics,
            processor,
            jobs,
            sweeper,
            generator,
            tracker,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn uptime(&self) -> Duration {
        self.metrics.uptime()
    }

    pub async fn create_record(&self, input: NewRecord) -> Result<DataRecord> {
        input.validate()?;
        self.insert_record(input.into_record()).await
    }

    /// Stores a fully formed record as-is.
    pub async fn insert_record(&self, record: DataRecord) -> Result<DataRecord> {
        self.store.put_doc(Bucket::Records, &record.id, &record).await?;
        info!(record_id = %record.id, record_type = %record.record_type, "data record created");
        Ok(record)
    }

    pub async fn get_record(&self, id: &str) -> Result<DataRecord> {
        self.store
            .get_doc(Bucket::Records, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("record {}", id)))
    }

    pub async fn list_records(&self) -> Result<Vec<DataRecord>> {
        self.store
            .scan_all(Bucket::Records)
            .await?
            .iter()
            .map(|(_, value)| codec::decode(value))
            .collect()
    }

    pub async fn record_count(&self) -> Result<u64> {
        self.store.count(Bucket::Records).await
    }

    /// Runs one drain with an explicit batch size.
    pub async fn process_pending(&self, batch_size: usize) -> Result<BatchReport> {
        self.processor.run(batch_size).await
    }

    pub fn create_job(&self) -> ProcessingJob {
        self.jobs.create_job()
    }

    pub fn get_job(&self, id: &str) -> Result<ProcessingJob> {
        self.jobs
            .get_job(id)
            .ok_or_else(|| Error::not_found(format!("job {}", id)))
    }

    pub fn list_jobs(&self) -> Vec<ProcessingJob> {
        self.jobs.list_jobs()
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.active_jobs()
    }

    /// Deletes records older than `cutoff` (RFC 3339), or older than the
    /// retention period when the cutoff is missing or malformed.
    pub async fn cleanup(&self, cutoff: Option<&str>) -> Result<SweepReport> {
        let cutoff = self.sweeper.resolve_cutoff(cutoff, chrono::Utc::now())?;
        self.sweeper.sweep(cutoff).await
    }

    pub fn generate_test_data(&self) {
        self.generator.generate();
    }

    /// Record gauges from one consistent scan of the records bucket.
    pub async fn data_metrics(&self) -> Result<DataMetrics> {
        let mut processed = 0u64;
        let mut pending = 0u64;
        let mut size = 0u64;

        self.store
            .scan_while(Bucket::Records, |_, value| {
                if let Ok(record) = codec::decode::<DataRecord>(value) {
                    if record.processed {
                        processed += 1;
                    } else {
                        pending += 1;
                    }
                    size += value.len() as u64;
                }
                ControlFlow::Continue(())
            })
            .await?;

        Ok(self.metrics.data_metrics(processed, pending, size))
    }

    pub fn processing_metrics(&self) -> ProcessingSnapshot {
        self.metrics.processing()
    }

    pub async fn health(&self) -> bool {
        self.store.ping().await.is_ok()
    }

    /// Starts the recurring drain. It stops when shutdown begins.
    pub fn start_processing(&self) {
        let ticker = BatchTicker::new(
            Arc::clone(&self.processor),
            self.config.processing_interval,
            self.config.batch_size,
            self.shutdown.clone(),
        );
        self.tracker.spawn(ticker.run());
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops the ticker, waits up to the grace period for in-flight jobs,
    /// drains and generator runs, then closes the store.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();

        let grace = self.config.shutdown_grace_period;
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                in_flight = self.tracker.len(),
                "background work still running after grace period"
            );
        }

        self.store.close().await;
        info!("store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use crate::processor::Passthrough;
    use std::collections::HashMap;

    async fn service() -> DataService {
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            ..Config::default()
        };
        DataService::open_with_transform(config, Arc::new(Passthrough))
            .await
            .unwrap()
    }

    fn new_record(record_type: &str) -> NewRecord {
        let mut data = HashMap::new();
        data.insert("k".to_string(), "v".to_string());
        NewRecord {
            record_type: record_type.to_string(),
            data,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let service = service().await;
        let created = service.create_record(new_record("user_event")).await.unwrap();

        assert!(!created.processed);
        assert!(created.processed_at.is_none());
        assert_eq!(service.get_record(&created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn invalid_record_is_rejected_before_write() {
        let service = service().await;
        let err = service.create_record(new_record("")).await.unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(service.record_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_record_is_not_found_and_store_unchanged() {
        let service = service().await;
        service.create_record(new_record("metric")).await.unwrap();

        let err = service.get_record("does-not-exist").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(service.record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fifteen_records_drain_in_two_batches() {
        let service = service().await;
        for _ in 0..15 {
            service.create_record(new_record("user_event")).await.unwrap();
        }

        service.process_pending(10).await.unwrap();
        let metrics = service.data_metrics().await.unwrap();
        assert_eq!(metrics.processed_records, 10);
        assert_eq!(metrics.pending_records, 5);

        service.process_pending(10).await.unwrap();
        let metrics = service.data_metrics().await.unwrap();
        assert_eq!(metrics.processed_records, 15);
        assert_eq!(metrics.pending_records, 0);
        assert!(metrics.data_size_bytes > 0);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let service = service().await;
        assert!(matches!(service.get_job("nope"), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_jobs() {
        let service = service().await;
        service.create_record(new_record("trace")).await.unwrap();
        service.start_processing();
        let job = service.create_job();

        service.shutdown().await;

        let job = service.get_job(&job.id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(!service.health().await);
    }

    #[tokio::test]
    async fn out_of_range_retention_fails_to_open() {
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            retention_period: humantime::parse_duration("300000years").unwrap(),
            ..Config::default()
        };
        let err = DataService::open_with_transform(config, Arc::new(Passthrough))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Validation(_)));
    }
}
