// Copyright 2026 RCE project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use thiserror::Error;

/// Process- and job-level errors the dispatcher loop must classify (spec §7).
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("missing required environment variable `{0}`")]
    MissingConfig(String),

    #[error("invalid value for environment variable `{0}`: {1}")]
    InvalidConfig(String, String),

    /// Fatal at startup; transient at runtime (the loop logs and continues retrying the
    /// next dequeue rather than crashing).
    #[error("work queue unreachable: {0}")]
    QueueUnreachable(String),

    /// Fatal at startup; transient at runtime (a failed write is logged and the affected
    /// job is skipped, not retried).
    #[error("record store unreachable: {0}")]
    RecordStoreUnreachable(String),

    #[error("malformed job payload: {0}")]
    MalformedJob(String),

    /// Never fatal; the dispatcher logs and moves on (spec §4.5 step 4: "execution already
    /// succeeded and the analysis step is advisory").
    #[error("analysis broadcast unreachable: {0}")]
    BroadcastUnreachable(String),
}
