// Copyright 2026 RCE project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Outbound broadcast channel (spec §6): a fire-and-forget notification published after a
//! job's record has been written, so a downstream analysis step can pick it up. Never
//! fatal — publication failures are logged, not retried.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::Serialize;

use crate::error::DispatcherError;

pub const ANALYSIS_QUEUE: &str = "analysis_queue";

#[derive(Serialize)]
struct AnalysisMessage<'a> {
    #[serde(rename = "jobId")]
    job_id: &'a str,
    language: &'a str,
    code: &'a str,
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, job_id: &str, language: &str, code: &str)
        -> Result<(), DispatcherError>;
}

pub struct RedisBroadcaster {
    connection: redis::aio::MultiplexedConnection,
    channel: String,
}

impl RedisBroadcaster {
    pub async fn connect(url: &str, channel: impl Into<String>) -> Result<Self, DispatcherError> {
        let client = redis::Client::open(url)
            .map_err(|err| DispatcherError::BroadcastUnreachable(err.to_string()))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| DispatcherError::BroadcastUnreachable(err.to_string()))?;
        Ok(Self {
            connection,
            channel: channel.into(),
        })
    }
}

#[async_trait]
impl Broadcaster for RedisBroadcaster {
    async fn publish(
        &self,
        job_id: &str,
        language: &str,
        code: &str,
    ) -> Result<(), DispatcherError> {
        let mut conn = self.connection.clone();
        let message = AnalysisMessage {
            job_id,
            language,
            code,
        };
        let payload = serde_json::to_string(&message)
            .map_err(|err| DispatcherError::BroadcastUnreachable(err.to_string()))?;
        conn.publish(&self.channel, payload)
            .await
            .map_err(|err| DispatcherError::BroadcastUnreachable(err.to_string()))
    }
}
