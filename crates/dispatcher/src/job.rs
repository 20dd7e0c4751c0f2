// Copyright 2026 RCE project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Wire format for a dequeued job, as produced by the submission API (spec §6).

use executor::Job;
use serde::Deserialize;

use crate::error::DispatcherError;

#[derive(Debug, Deserialize)]
pub struct JobPayload {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub language: String,
    pub code: String,
    #[serde(rename = "submittedAt")]
    pub submitted_at: String,
}

impl JobPayload {
    pub fn parse(raw: &[u8]) -> Result<Self, DispatcherError> {
        serde_json::from_slice(raw).map_err(|err| DispatcherError::MalformedJob(err.to_string()))
    }
}

impl From<JobPayload> for Job {
    fn from(payload: JobPayload) -> Self {
        Job {
            job_id: payload.job_id,
            language: payload.language,
            code: payload.code,
            submitted_at: payload.submitted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_payload() {
        let raw = br#"{"jobId":"abc","language":"python","code":"print(1)","submittedAt":"2026-07-28T00:00:00Z"}"#;
        let payload = JobPayload::parse(raw).unwrap();
        assert_eq!(payload.job_id, "abc");
        assert_eq!(payload.language, "python");
    }

    #[test]
    fn rejects_malformed_payload() {
        let err = JobPayload::parse(b"not json").unwrap_err();
        assert!(matches!(err, DispatcherError::MalformedJob(_)));
    }

    #[test]
    fn rejects_payload_missing_required_field() {
        let raw = br#"{"jobId":"abc","language":"python"}"#;
        let err = JobPayload::parse(raw).unwrap_err();
        assert!(matches!(err, DispatcherError::MalformedJob(_)));
    }
}
