//! Versioned JSON documents for persisted entities.
//!
//! Every stored value is the entity's JSON object with an extra `version`
//! field. Documents written before versioning existed carry no `version` and
//! decode as version 0.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EncodeEnvelope<'a, T> {
    version: u32,
    #[serde(flatten)]
    entity: &'a T,
}

#[derive(Deserialize)]
struct DecodeEnvelope<T> {
    #[serde(default)]
    version: u32,
    #[serde(flatten)]
    entity: T,
}

pub fn encode<T: Serialize>(entity: &T) -> Result<Vec<u8>> {
    let envelope = EncodeEnvelope {
        version: DOCUMENT_VERSION,
        entity,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let envelope: DecodeEnvelope<T> = serde_json::from_slice(bytes)?;
    if envelope.version > DOCUMENT_VERSION {
        return Err(Error::UnsupportedVersion {
            found: envelope.version,
            supported: DOCUMENT_VERSION,
        });
    }
    Ok(envelope.entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataRecord, JobStatus, ProcessingJob};
    use std::collections::HashMap;

    #[test]
    fn encoded_document_carries_version() {
        let record = DataRecord::new("metric".into(), HashMap::new());
        let bytes = encode(&record).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["version"], DOCUMENT_VERSION);
        assert_eq!(value["id"], record.id.as_str());
        assert_eq!(decode::<DataRecord>(&bytes).unwrap(), record);
    }

    #[test]
    fn legacy_document_without_version_decodes() {
        let legacy = br#"{
            "id": "abc",
            "type": "system_log",
            "data": {"source": "generator"},
            "timestamp": "2024-01-01T00:00:00Z",
            "processed": true,
            "processed_at": "2024-01-01T00:00:01Z"
        }"#;

        let record: DataRecord = decode(legacy).unwrap();
        assert_eq!(record.id, "abc");
        assert!(record.processed);
        assert_eq!(record.payload.get("source").map(String::as_str), Some("generator"));
    }

    #[test]
    fn newer_version_is_rejected() {
        let future = br#"{"version": 99, "id": "j", "status": "pending", "start_time": "2024-01-01T00:00:00Z"}"#;
        let err = decode::<ProcessingJob>(future).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { found: 99, .. }));
    }

    #[test]
    fn job_round_trips() {
        let mut job = ProcessingJob::new();
        job.start();
        job.fail("scan failed".into());

        let decoded: ProcessingJob = decode(&encode(&job).unwrap()).unwrap();
        assert_eq!(decoded.status, JobStatus::Failed);
        assert_eq!(decoded, job);
    }
}
