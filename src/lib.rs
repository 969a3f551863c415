//! A durable record store with bounded background processing.
//!
//! `data-service` accepts typed data records, persists them in SQLite, and
//! moves them from pending to processed in bounded batches. Processing runs
//! on a recurring timer and on demand through tracked jobs.
//!
//! # Features
//!
//! - Two independent buckets (`records`, `jobs`) with snapshot scans
//! - Single-flight batch draining with per-record skip on failure
//! - Jobs with `pending -> running -> completed | failed` lifecycle
//! - Retention sweeps by timestamp cutoff
//! - Versioned JSON documents on disk
//!
//! # Example
//!
//! ```no_run
//! use data_service::{Config, DataService, NewRecord};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = DataService::open(Config::default()).await?;
//!
//!     let record = service
//!         .create_record(NewRecord {
//!             record_type: "user_event".to_string(),
//!             data: Default::default(),
//!         })
//!         .await?;
//!     service.process_pending(10).await?;
//!     assert!(service.get_record(&record.id).await?.processed);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod processor;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{DataRecord, JobStatus, NewRecord, ProcessingJob};
pub use service::DataService;
