//! On-demand processing jobs.
//!
//! A job is registered as `pending`, flips to `running` once its background
//! run starts, and ends `completed` (with the number of records its drain
//! actually processed) or `failed` when the drain could not run at all.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::models::ProcessingJob;
use crate::processor::BatchProcessor;
use crate::store::{Bucket, Store};

/// Thread-safe in-memory registry of jobs keyed by id.
pub struct JobRegistry {
    inner: RwLock<HashMap<String, ProcessingJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<ProcessingJob> {
        self.inner.read().ok()?.get(id).cloned()
    }

    pub fn insert(&self, job: ProcessingJob) {
        if let Ok(mut guard) = self.inner.write() {
            guard.insert(job.id.clone(), job);
        }
    }

    /// Applies `f` to the job under the write lock and returns the result.
    pub fn update<F>(&self, id: &str, f: F) -> Option<ProcessingJob>
    where
        F: FnOnce(&mut ProcessingJob),
    {
        let mut guard = self.inner.write().ok()?;
        let job = guard.get_mut(id)?;
        f(job);
        Some(job.clone())
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<ProcessingJob> {
        let mut jobs: Vec<_> = self
            .inner
            .read()
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Jobs that have not reached a terminal status.
    pub fn active(&self) -> usize {
        self.inner
            .read()
            .map(|g| g.values().filter(|j| !j.status.is_terminal()).count())
            .unwrap_or(0)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct JobCoordinator {
    runner: JobRunner,
    tracker: TaskTracker,
}

#[derive(Clone)]
struct JobRunner {
    registry: Arc<JobRegistry>,
    processor: Arc<BatchProcessor>,
    store: Arc<Store>,
    batch_size: usize,
}

impl JobCoordinator {
    pub fn new(
        store: Arc<Store>,
        processor: Arc<BatchProcessor>,
        batch_size: usize,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            runner: JobRunner {
                registry: Arc::new(JobRegistry::new()),
                processor,
                store,
                batch_size,
            },
            tracker,
        }
    }

    /// Registers a new job and starts its run in the background. The
    /// returned snapshot is the job as created, before the run begins.
    pub fn create_job(&self) -> ProcessingJob {
        let job = ProcessingJob::new();
        self.runner.registry.insert(job.clone());
        info!(job_id = %job.id, "job created");

        let runner = self.runner.clone();
        let id = job.id.clone();
        self.tracker.spawn(async move { runner.run(&id).await });

        job
    }

    pub fn get_job(&self, id: &str) -> Option<ProcessingJob> {
        self.runner.registry.get(id)
    }

    pub fn list_jobs(&self) -> Vec<ProcessingJob> {
        self.runner.registry.list()
    }

    pub fn active_jobs(&self) -> usize {
        self.runner.registry.active()
    }
}

impl JobRunner {
    async fn run(&self, id: &str) {
        let Some(job) = self.registry.update(id, ProcessingJob::start) else {
            warn!(job_id = %id, "job vanished before it started");
            return;
        };
        self.persist(&job).await;

        let finished = match self.processor.run(self.batch_size).await {
            Ok(report) => {
                let job = self.registry.update(id, |job| job.complete(report.processed));
                info!(
                    job_id = %id,
                    records_processed = report.processed,
                    skipped = report.skipped,
                    "job completed"
                );
                job
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "job failed");
                self.registry.update(id, |job| job.fail(e.to_string()))
            }
        };

        if let Some(job) = finished {
            self.persist(&job).await;
        }
    }

    async fn persist(&self, job: &ProcessingJob) {
        if let Err(e) = self.store.put_doc(Bucket::Jobs, &job.id, job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist job state");
        }
    }
}
