use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A typed data record as persisted in the `records` bucket.
///
/// `processed_at` is present exactly when `processed` is `true`; the only
/// way to move a record out of the pending state is [`DataRecord::mark_processed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(rename = "data", default)]
    pub payload: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl DataRecord {
    pub fn new(record_type: String, payload: HashMap<String, String>) -> Self {
        Self::with_timestamp(record_type, payload, Utc::now())
    }

    pub fn with_timestamp(
        record_type: String,
        payload: HashMap<String, String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            record_type,
            payload,
            timestamp,
            processed: false,
            processed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.processed
    }

    /// Transitions the record to processed. A record that is already
    /// processed keeps its original `processed_at`.
    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        if self.processed {
            return;
        }
        self.processed = true;
        self.processed_at = Some(now.max(self.timestamp));
    }
}

/// Body accepted by record creation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRecord {
    #[serde(rename = "type", default)]
    pub record_type: String,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl NewRecord {
    pub fn validate(&self) -> Result<()> {
        if self.record_type.trim().is_empty() {
            return Err(Error::validation("record type must not be empty"));
        }
        Ok(())
    }

    pub fn into_record(self) -> DataRecord {
        DataRecord::new(self.record_type, self.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A user-triggered processing run and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub records_processed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingJob {
    pub fn new() -> Self {
        Self {
            id: new_id(),
            status: JobStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            records_processed: 0,
            error: None,
        }
    }

    pub fn start(&mut self) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Running;
        }
    }

    pub fn complete(&mut self, records_processed: usize) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Completed;
        self.records_processed = records_processed;
        self.end_time = Some(Utc::now());
    }

    pub fn fail(&mut self, error: String) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.end_time = Some(Utc::now());
    }
}

impl Default for ProcessingJob {
    fn default() -> Self {
        Self::new()
    }
}

/// UUIDv7 keeps bucket key order aligned with creation order.
fn new_id() -> String {
    Uuid::now_v7().to_string()
}
