//! Synthetic record generation for exercising the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio_util::task::TaskTracker;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::GeneratorConfig;
use crate::models::DataRecord;
use crate::store::{Bucket, Store};

pub const RECORD_TYPES: [&str; 4] = ["user_event", "system_log", "metric", "trace"];

pub struct Generator {
    store: Arc<Store>,
    config: GeneratorConfig,
    tracker: TaskTracker,
}

impl Generator {
    pub fn new(store: Arc<Store>, config: GeneratorConfig, tracker: TaskTracker) -> Self {
        Self {
            store,
            config,
            tracker,
        }
    }

    /// Starts a background run and returns immediately.
    pub fn generate(&self) {
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        self.tracker.spawn(async move {
            let written = run(&store, &config).await;
            info!(written, requested = config.count, "test data generation finished");
        });
    }
}

async fn run(store: &Store, config: &GeneratorConfig) -> usize {
    let mut written = 0;
    for i in 0..config.count {
        let record = random_record();
        match store.put_doc(Bucket::Records, &record.id, &record).await {
            Ok(()) => written += 1,
            Err(e) => error!(record_id = %record.id, error = %e, "failed to save test record"),
        }

        if i + 1 < config.count && !config.interval.is_zero() {
            tokio::time::sleep(config.interval).await;
        }
    }
    written
}

pub fn random_record() -> DataRecord {
    let mut rng = rand::thread_rng();
    let record_type = RECORD_TYPES.choose(&mut rng).copied().unwrap_or("user_event");

    let mut payload = HashMap::new();
    payload.insert("source".to_string(), "generator".to_string());
    payload.insert("category".to_string(), format!("category_{}", rng.gen_range(0..10)));
    payload.insert("priority".to_string(), rng.gen_range(1..=5u8).to_string());
    payload.insert("session_id".to_string(), Uuid::new_v4().to_string());

    let age_secs: i64 = rng.gen_range(0..3600);
    let timestamp = Utc::now() - chrono::Duration::seconds(age_secs);

    DataRecord::with_timestamp(record_type.to_string(), payload, timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::db::init_pool;
    use std::time::Duration;

    #[test]
    fn random_records_are_well_formed() {
        for _ in 0..20 {
            let record = random_record();
            assert!(RECORD_TYPES.contains(&record.record_type.as_str()));
            assert!(record.is_pending());
            assert_eq!(record.payload["source"], "generator");

            let priority: u8 = record.payload["priority"].parse().unwrap();
            assert!((1..=5).contains(&priority));
            assert!(Utc::now() - record.timestamp <= chrono::Duration::hours(1));
        }
    }

    #[tokio::test]
    async fn generate_writes_configured_count_in_background() {
        let store = Arc::new(Store::new(init_pool("sqlite::memory:").await.unwrap()));
        let tracker = TaskTracker::new();
        let generator = Generator::new(
            Arc::clone(&store),
            GeneratorConfig {
                count: 5,
                interval: Duration::ZERO,
            },
            tracker.clone(),
        );

        generator.generate();
        tracker.close();
        tracker.wait().await;

        let records = store.scan_all(Bucket::Records).await.unwrap();
        assert_eq!(records.len(), 5);
        for (_, value) in records {
            let record: DataRecord = codec::decode(&value).unwrap();
            assert!(!record.processed);
        }
    }
}
