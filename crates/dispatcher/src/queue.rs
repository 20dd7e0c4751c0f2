// Copyright 2026 RCE project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Inbound work queue (spec §6): a FIFO list of pending submissions, popped one at a time.

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::DispatcherError;

pub const SUBMISSION_QUEUE: &str = "submission_queue";

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Blocks until a job is available, then pops it from the head of the queue.
    async fn dequeue(&self) -> Result<Vec<u8>, DispatcherError>;
}

pub struct RedisWorkQueue {
    connection: redis::aio::MultiplexedConnection,
    queue_name: String,
}

impl RedisWorkQueue {
    pub async fn connect(
        url: &str,
        queue_name: impl Into<String>,
    ) -> Result<Self, DispatcherError> {
        let client = redis::Client::open(url)
            .map_err(|err| DispatcherError::QueueUnreachable(err.to_string()))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| DispatcherError::QueueUnreachable(err.to_string()))?;
        Ok(Self {
            connection,
            queue_name: queue_name.into(),
        })
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn dequeue(&self) -> Result<Vec<u8>, DispatcherError> {
        let mut conn = self.connection.clone();
        // Timeout 0 blocks indefinitely; the dispatcher has no deadline on an idle queue.
        let (_key, payload): (String, Vec<u8>) = conn
            .blpop(&self.queue_name, 0.0)
            .await
            .map_err(|err| DispatcherError::QueueUnreachable(err.to_string()))?;
        Ok(payload)
    }
}
