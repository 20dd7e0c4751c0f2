// Copyright 2026 RCE project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Record store (spec §6): the durable, queryable home for each job's lifecycle, keyed by
//! job id. Writes are partial-field updates, not whole-document replacements.

use async_trait::async_trait;
use redis::AsyncCommands;

use executor::ExecutionOutcome;

use crate::error::DispatcherError;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn mark_processing(&self, job_id: &str, started_at: &str) -> Result<(), DispatcherError>;

    async fn mark_terminal(
        &self,
        job_id: &str,
        outcome: &ExecutionOutcome,
        completed_at: &str,
    ) -> Result<(), DispatcherError>;
}

pub struct RedisRecordStore {
    connection: redis::aio::MultiplexedConnection,
}

impl RedisRecordStore {
    pub async fn connect(url: &str) -> Result<Self, DispatcherError> {
        let client = redis::Client::open(url)
            .map_err(|err| DispatcherError::RecordStoreUnreachable(err.to_string()))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| DispatcherError::RecordStoreUnreachable(err.to_string()))?;
        Ok(Self { connection })
    }

    fn key(job_id: &str) -> String {
        format!("job:{job_id}")
    }
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn mark_processing(&self, job_id: &str, started_at: &str) -> Result<(), DispatcherError> {
        let mut conn = self.connection.clone();
        conn.hset_multiple(
            Self::key(job_id),
            &[("status", "processing"), ("startedAt", started_at)],
        )
        .await
        .map_err(|err| DispatcherError::RecordStoreUnreachable(err.to_string()))
    }

    async fn mark_terminal(
        &self,
        job_id: &str,
        outcome: &ExecutionOutcome,
        completed_at: &str,
    ) -> Result<(), DispatcherError> {
        let mut conn = self.connection.clone();
        let execution_time_ms = outcome.execution_time.as_millis().to_string();
        let exit_code = outcome.exit_code.to_string();

        let mut fields = vec![
            ("status", outcome.status.as_str()),
            ("completedAt", completed_at),
            ("output", outcome.output.as_str()),
            ("executionTime", execution_time_ms.as_str()),
            ("exitCode", exit_code.as_str()),
        ];
        if !outcome.error.is_empty() {
            fields.push(("error", outcome.error.as_str()));
        }

        conn.hset_multiple(Self::key(job_id), &fields)
            .await
            .map_err(|err| DispatcherError::RecordStoreUnreachable(err.to_string()))
    }
}
