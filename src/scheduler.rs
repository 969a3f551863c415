//! Recurring background drain of the pending backlog.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::processor::BatchProcessor;

pub struct BatchTicker {
    processor: Arc<BatchProcessor>,
    interval: Duration,
    batch_size: usize,
    shutdown: CancellationToken,
}

impl BatchTicker {
    pub fn new(
        processor: Arc<BatchProcessor>,
        interval: Duration,
        batch_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            processor,
            interval,
            batch_size,
            shutdown,
        }
    }

    /// Runs one drain per interval until the token is cancelled. A drain
    /// that has started is allowed to finish.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            "background processing started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.processor.run(self.batch_size).await {
                Ok(report) if report.selected > 0 => {
                    debug!(processed = report.processed, failed = report.failed, "tick drained backlog");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "background batch failed"),
            }
        }

        info!("background processing stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::db::init_pool;
    use crate::metrics::Metrics;
    use crate::models::DataRecord;
    use crate::processor::Passthrough;
    use crate::store::{Bucket, Store};

    #[tokio::test]
    async fn ticks_drain_backlog_until_cancelled() {
        let store = Arc::new(Store::new(init_pool("sqlite::memory:").await.unwrap()));
        for _ in 0..4 {
            let record = DataRecord::new("metric".into(), Default::default());
            store.put_doc(Bucket::Records, &record.id, &record).await.unwrap();
        }
        let processor = Arc::new(BatchProcessor::new(
            Arc::clone(&store),
            Arc::new(Passthrough),
            Arc::new(Metrics::new()),
        ));
        let token = CancellationToken::new();
        let ticker = BatchTicker::new(processor, Duration::from_millis(20), 2, token.clone());
        let handle = tokio::spawn(ticker.run());

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if count_processed(&store).await == 4 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        token.cancel();
        handle.await.unwrap();

        assert!(drained.is_ok());
        assert_eq!(count_processed(&store).await, 4);
    }

    async fn count_processed(store: &Store) -> usize {
        store
            .scan_all(Bucket::Records)
            .await
            .unwrap()
            .iter()
            .map(|(_, v)| codec::decode::<DataRecord>(v).unwrap())
            .filter(|r| r.processed)
            .count()
    }

    #[tokio::test]
    async fn cancelled_before_first_tick_does_nothing() {
        let store = Arc::new(Store::new(init_pool("sqlite::memory:").await.unwrap()));
        let record = DataRecord::new("metric".into(), Default::default());
        store.put_doc(Bucket::Records, &record.id, &record).await.unwrap();

        let processor = Arc::new(BatchProcessor::new(
            Arc::clone(&store),
            Arc::new(Passthrough),
            Arc::new(Metrics::new()),
        ));
        let token = CancellationToken::new();
        token.cancel();
        BatchTicker::new(processor, Duration::from_secs(60), 10, token)
            .run()
            .await;

        assert_eq!(count_processed(&store).await, 0);
    }
}
