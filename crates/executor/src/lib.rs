// Copyright 2026 RCE project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Composes the language registry, scratch manager, and sandbox runtime adapter into the
//! single entry point that turns a [`Job`] into a terminal [`ExecutionOutcome`].
//!
//! `execute` never returns a `Result`: every failure mode this system can encounter before
//! or during a run is itself a valid terminal outcome (`status: failed` or `status: timeout`)
//! to report back to the record store, not a process-level error.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use registry::{LanguageRegistry, LanguageSpec};
use sandbox::{
    container_name, language_hygiene_env, ContainerHandle, ContainerSpec, SandboxError,
    SandboxRuntime, WaitOutcome, KILL_GRACE,
};
use scratch::{ScratchError, ScratchManager, ScratchSlot};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const TIMEOUT_EXIT_CODE: i32 = 124;
pub const TIMEOUT_MESSAGE: &str = "Execution timed out. Your code took too long to execute.";

/// Label key the executor stamps on every container it creates, naming the shared scratch
/// volume the job's `ScratchSlot` lives on (spec §6's `SCRATCH_VOLUME_NAME`).
const SCRATCH_VOLUME_LABEL: &str = "rce.scratch-volume";

/// An immutable unit of work, as dequeued from the work queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub job_id: String,
    pub language: String,
    pub code: String,
    pub submitted_at: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Completed,
    Failed,
    Timeout,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Timeout => "timeout",
        }
    }
}

/// The terminal tuple produced for every job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: Status,
    pub output: String,
    pub exit_code: i32,
    pub execution_time: Duration,
    pub error: String,
}

/// Failures that can occur before or during a run, each mapping to a terminal `failed`
/// outcome (spec §7's per-job error kinds, minus the queue/record-store kinds which belong
/// to the dispatcher).
#[derive(Debug, Error)]
enum StepFailure {
    #[error("{0}")]
    ImageUnavailable(String),
    #[error("{0}")]
    ScratchUnavailable(String),
    #[error("{0}")]
    SandboxRuntimeError(String),
}

impl From<ScratchError> for StepFailure {
    fn from(err: ScratchError) -> Self {
        StepFailure::ScratchUnavailable(err.to_string())
    }
}

impl From<SandboxError> for StepFailure {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::ImageUnavailable(msg) => StepFailure::ImageUnavailable(msg),
            other => StepFailure::SandboxRuntimeError(other.to_string()),
        }
    }
}

enum RunOutcome {
    Exited {
        exit_code: i32,
        /// `Ok` on successful log retrieval, `Err` with a diagnostic message otherwise —
        /// a log failure never downgrades `exit_code`'s completed/failed classification.
        output: Result<String, String>,
    },
    /// The wait was cut short. `logs` is `None` on the deadline path, where runtime buffers
    /// are drained but deliberately discarded in favor of the canned timeout message; it is
    /// `Some` on the parent-cancellation path, where whatever was retrievable is kept.
    Cancelled { logs: Option<Result<String, String>> },
}

/// Given a job, composes the registry, scratch manager, and sandbox runtime to produce a
/// terminal [`ExecutionOutcome`]. Owns timeout enforcement and cleanup ordering.
pub struct Executor {
    registry: LanguageRegistry,
    scratch: ScratchManager,
    sandbox: SandboxRuntime,
}

impl Executor {
    pub fn new(registry: LanguageRegistry, scratch: ScratchManager, sandbox: SandboxRuntime) -> Self {
        Self {
            registry,
            scratch,
            sandbox,
        }
    }

    pub async fn execute(&self, parent_cancel: &CancellationToken, job: &Job) -> ExecutionOutcome {
        let start = Instant::now();

        let spec = match self.registry.lookup(&job.language) {
            Some(spec) => spec.clone(),
            None => {
                return ExecutionOutcome {
                    status: Status::Failed,
                    output: String::new(),
                    exit_code: 1,
                    execution_time: start.elapsed(),
                    error: format!("unsupported language: {}", job.language),
                };
            }
        };

        let job_cancel = parent_cancel.child_token();
        let deadline_guard = {
            let job_cancel = job_cancel.clone();
            let timeout = spec.timeout;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => job_cancel.cancel(),
                    _ = job_cancel.cancelled() => {}
                }
            })
        };

        let result = self.run(&spec, job, &job_cancel, parent_cancel).await;
        deadline_guard.abort();

        let timed_out = job_cancel.is_cancelled() && !parent_cancel.is_cancelled();

        match result {
            Err(failure) => ExecutionOutcome {
                status: Status::Failed,
                output: String::new(),
                exit_code: 1,
                execution_time: start.elapsed(),
                error: failure.to_string(),
            },
            Ok(RunOutcome::Cancelled { .. }) if timed_out => ExecutionOutcome {
                status: Status::Timeout,
                output: TIMEOUT_MESSAGE.to_string(),
                exit_code: TIMEOUT_EXIT_CODE,
                execution_time: start.elapsed(),
                error: format!("execution exceeded {:?} limit", spec.timeout),
            },
            Ok(RunOutcome::Cancelled { logs }) => {
                let output = match logs {
                    Some(Ok(text)) => text,
                    _ => String::new(),
                };
                ExecutionOutcome {
                    status: Status::Failed,
                    output,
                    exit_code: 1,
                    execution_time: start.elapsed(),
                    error: "cancelled".to_string(),
                }
            }
            Ok(RunOutcome::Exited { exit_code, output }) => {
                let status = if exit_code == 0 {
                    Status::Completed
                } else {
                    Status::Failed
                };
                match output {
                    Ok(text) => ExecutionOutcome {
                        status,
                        output: text,
                        exit_code,
                        execution_time: start.elapsed(),
                        error: String::new(),
                    },
                    Err(log_err) => ExecutionOutcome {
                        status,
                        output: String::new(),
                        exit_code,
                        execution_time: start.elapsed(),
                        error: log_err,
                    },
                }
            }
        }
    }

    async fn run(
        &self,
        spec: &LanguageSpec,
        job: &Job,
        job_cancel: &CancellationToken,
        parent_cancel: &CancellationToken,
    ) -> Result<RunOutcome, StepFailure> {
        self.sandbox.ensure_image(&spec.image).await?;

        let slot = self.scratch.allocate(&job.job_id).await?;
        let outcome = self
            .run_in_scratch(spec, job, job_cancel, parent_cancel, &slot)
            .await;
        self.scratch.release(slot).await;
        outcome
    }

    async fn run_in_scratch(
        &self,
        spec: &LanguageSpec,
        job: &Job,
        job_cancel: &CancellationToken,
        parent_cancel: &CancellationToken,
        slot: &ScratchSlot,
    ) -> Result<RunOutcome, StepFailure> {
        let filename = format!("script{}", spec.extension);
        self.scratch
            .write_code(slot, &filename, job.code.as_bytes())
            .await?;

        let container_spec =
            container_spec_for(spec, job, slot, &filename, self.scratch.volume_name());

        let handle = self.sandbox.create(&container_spec).await?;
        let outcome = self.run_container(&handle, job_cancel, parent_cancel).await;

        match tokio::time::timeout(KILL_GRACE, self.sandbox.remove(&handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("cleanup: failed to remove container `{}`: {err}", handle.id),
            Err(_) => log::warn!(
                "cleanup: removing container `{}` did not finish within {:?}",
                handle.id,
                KILL_GRACE
            ),
        }

        outcome
    }

    async fn run_container(
        &self,
        handle: &ContainerHandle,
        job_cancel: &CancellationToken,
        parent_cancel: &CancellationToken,
    ) -> Result<RunOutcome, StepFailure> {
        self.sandbox.start(handle).await?;

        let wait_result = self.sandbox.wait(handle, job_cancel).await;
        let cancelled =
            matches!(wait_result, Ok(WaitOutcome::Cancelled)) || job_cancel.is_cancelled();

        if cancelled {
            if let Err(err) = self.sandbox.kill(handle).await {
                log::warn!("cleanup: failed to kill container `{}`: {err}", handle.id);
            }

            if parent_cancel.is_cancelled() {
                // A real shutdown, not just the per-job deadline: the container may have
                // already printed something worth keeping (spec §4.4 step 9's "parent
                // context cancelled" row).
                let logs = match self.sandbox.logs(handle).await {
                    Ok((stdout, stderr)) => Ok(combine_streams(stdout, stderr)),
                    Err(err) => Err(err.to_string()),
                };
                return Ok(RunOutcome::Cancelled { logs: Some(logs) });
            }

            // Deadline path: drain the runtime's log buffers but discard them, since the
            // canned timeout message is returned to the caller instead (spec step 10).
            let _ = self.sandbox.logs(handle).await;
            return Ok(RunOutcome::Cancelled { logs: None });
        }

        let exit_code = match wait_result {
            Ok(WaitOutcome::Exited { exit_code }) => exit_code as i32,
            Ok(WaitOutcome::Cancelled) => unreachable!("handled above"),
            Err(err) => return Err(StepFailure::from(err)),
        };

        let output = match self.sandbox.logs(handle).await {
            Ok((stdout, stderr)) => Ok(combine_streams(stdout, stderr)),
            Err(err) => Err(err.to_string()),
        };

        Ok(RunOutcome::Exited { exit_code, output })
    }
}

/// Builds the container spec for one job, stamping the shared scratch volume's name onto
/// the container as a label so it stays observable even though the bind mount itself
/// addresses the job's subdirectory by host path, not by volume name (spec §6).
fn container_spec_for(
    spec: &LanguageSpec,
    job: &Job,
    slot: &ScratchSlot,
    filename: &str,
    volume_name: &str,
) -> ContainerSpec {
    let mut labels = HashMap::new();
    labels.insert(SCRATCH_VOLUME_LABEL.to_string(), volume_name.to_string());

    ContainerSpec {
        name: container_name(&job.job_id),
        image: spec.image.clone(),
        argv: vec![
            spec.executor.clone(),
            format!("{}/{filename}", slot.sandbox_path.display()),
        ],
        host_code_path: slot.host_path.display().to_string(),
        sandbox_code_path: slot.sandbox_path.display().to_string(),
        env: language_hygiene_env(&spec.executor),
        labels,
    }
}

/// Concatenates stdout then stderr (separated by a newline if stdout is non-empty and
/// unterminated), then right-trims whitespace.
fn combine_streams(stdout: String, stderr: String) -> String {
    let mut combined = stdout;
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    combined.trim_end().to_string()
}
