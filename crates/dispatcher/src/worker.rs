// Copyright 2026 RCE project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The dispatch loop (spec §4.5): dequeue, validate, mark processing, execute, record,
//! broadcast — bounded to a fixed number of concurrent jobs.

use std::sync::Arc;

use chrono::Utc;
use executor::{Executor, Job};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::broadcaster::Broadcaster;
use crate::job::JobPayload;
use crate::queue::WorkQueue;
use crate::record_store::RecordStore;

pub struct Worker {
    pub queue: Arc<dyn WorkQueue>,
    pub record_store: Arc<dyn RecordStore>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub executor: Arc<Executor>,
    pub concurrency: usize,
}

impl Worker {
    /// Runs until `shutdown` is cancelled, then drains any jobs already in flight before
    /// returning. The caller is responsible for bounding how long it waits for that drain.
    pub async fn run(&self, shutdown: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            while in_flight.try_join_next().is_some() {}

            let raw = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.queue.dequeue() => match result {
                    Ok(raw) => raw,
                    Err(err) => {
                        log::error!("work queue error, retrying: {err}");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            let payload = match JobPayload::parse(&raw) {
                Ok(payload) => payload,
                Err(err) => {
                    log::error!("dropping malformed job payload: {err}");
                    continue;
                }
            };

            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            let record_store = self.record_store.clone();
            let broadcaster = self.broadcaster.clone();
            let executor = self.executor.clone();
            let job_cancel = shutdown.clone();

            in_flight.spawn(async move {
                let _permit = permit;
                process_job(payload, executor, record_store, broadcaster, job_cancel).await;
            });
        }

        while in_flight.join_next().await.is_some() {}
    }
}

async fn process_job(
    payload: JobPayload,
    executor: Arc<Executor>,
    record_store: Arc<dyn RecordStore>,
    broadcaster: Arc<dyn Broadcaster>,
    cancel: CancellationToken,
) {
    let job_id = payload.job_id.clone();
    let language = payload.language.clone();
    let code = payload.code.clone();
    let job: Job = payload.into();

    let started_at = Utc::now().to_rfc3339();
    if let Err(err) = record_store.mark_processing(&job_id, &started_at).await {
        log::error!("failed to mark job `{job_id}` processing, skipping: {err}");
        return;
    }

    let outcome = executor.execute(&cancel, &job).await;

    let completed_at = Utc::now().to_rfc3339();
    if let Err(err) = record_store
        .mark_terminal(&job_id, &outcome, &completed_at)
        .await
    {
        log::error!("failed to record terminal outcome for job `{job_id}`: {err}");
        return;
    }

    log::info!(
        "job `{job_id}` finished with status `{}`",
        outcome.status.as_str()
    );

    if let Err(err) = broadcaster.publish(&job_id, &language, &code).await {
        log::warn!("failed to publish analysis notification for job `{job_id}`: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use executor::ExecutionOutcome;
    use registry::LanguageRegistry;
    use sandbox::SandboxRuntime;
    use scratch::ScratchManager;

    use crate::error::DispatcherError;

    #[derive(Default)]
    struct FakeRecordStore {
        fail_processing: bool,
        fail_terminal: bool,
        processing_calls: Mutex<Vec<String>>,
        terminal_calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl RecordStore for FakeRecordStore {
        async fn mark_processing(
            &self,
            job_id: &str,
            _started_at: &str,
        ) -> Result<(), DispatcherError> {
            if self.fail_processing {
                return Err(DispatcherError::RecordStoreUnreachable("down".to_string()));
            }
            self.processing_calls.lock().unwrap().push(job_id.to_string());
            Ok(())
        }

        async fn mark_terminal(
            &self,
            job_id: &str,
            outcome: &ExecutionOutcome,
            _completed_at: &str,
        ) -> Result<(), DispatcherError> {
            if self.fail_terminal {
                return Err(DispatcherError::RecordStoreUnreachable("down".to_string()));
            }
            self.terminal_calls
                .lock()
                .unwrap()
                .push((job_id.to_string(), outcome.status.as_str().to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeBroadcaster {
        published: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Broadcaster for FakeBroadcaster {
        async fn publish(
            &self,
            job_id: &str,
            _language: &str,
            _code: &str,
        ) -> Result<(), DispatcherError> {
            self.published.lock().unwrap().push(job_id.to_string());
            Ok(())
        }
    }

    // An Executor over an empty registry always fails fast on "unsupported language"
    // without touching scratch or the sandbox runtime, making it a safe deterministic
    // stand-in here: this test exercises process_job's own control flow, not Executor's.
    fn fails_fast_executor() -> Arc<Executor> {
        let registry = LanguageRegistry::empty();
        let scratch = ScratchManager::new(std::env::temp_dir(), "/code", "test-volume");
        let sandbox = SandboxRuntime::connect(None).expect("local client construction cannot fail");
        Arc::new(Executor::new(registry, scratch, sandbox))
    }

    fn payload(job_id: &str) -> JobPayload {
        JobPayload {
            job_id: job_id.to_string(),
            language: "brainfuck".to_string(),
            code: "+".to_string(),
            submitted_at: "2026-07-28T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn happy_path_records_then_broadcasts() {
        let record_store = Arc::new(FakeRecordStore::default());
        let broadcaster = Arc::new(FakeBroadcaster::default());

        process_job(
            payload("job-1"),
            fails_fast_executor(),
            record_store.clone(),
            broadcaster.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(
            *record_store.processing_calls.lock().unwrap(),
            vec!["job-1".to_string()]
        );
        let terminal = record_store.terminal_calls.lock().unwrap();
        assert_eq!(terminal[0], ("job-1".to_string(), "failed".to_string()));
        assert_eq!(*broadcaster.published.lock().unwrap(), vec!["job-1".to_string()]);
    }

    #[tokio::test]
    async fn failed_mark_processing_skips_execution_and_broadcast() {
        let record_store = Arc::new(FakeRecordStore {
            fail_processing: true,
            ..Default::default()
        });
        let broadcaster = Arc::new(FakeBroadcaster::default());

        process_job(
            payload("job-2"),
            fails_fast_executor(),
            record_store.clone(),
            broadcaster.clone(),
            CancellationToken::new(),
        )
        .await;

        assert!(record_store.terminal_calls.lock().unwrap().is_empty());
        assert!(broadcaster.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_mark_terminal_suppresses_broadcast() {
        let record_store = Arc::new(FakeRecordStore {
            fail_terminal: true,
            ..Default::default()
        });
        let broadcaster = Arc::new(FakeBroadcaster::default());

        process_job(
            payload("job-3"),
            fails_fast_executor(),
            record_store.clone(),
            broadcaster.clone(),
            CancellationToken::new(),
        )
        .await;

        assert!(broadcaster.published.lock().unwrap().is_empty());
    }
}
