// Copyright 2026 RCE project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Thin, testable wrapper over the host container runtime (Docker, via `bollard`).
//!
//! Mirrors the shape of a Docker-backed command runner: a single lazily-connected client,
//! an image-pull-or-skip check, and container create/start/wait/kill/logs/remove primitives
//! that the executor composes. Unlike a build-system command runner, this adapter never
//! mounts inputs read-write or reuses containers across jobs — each job gets exactly one
//! disposable container.

use std::collections::HashMap;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Container name prefix used to deterministically derive a name from a job id. This also
/// guarantees that a redelivered job with the same id fails loudly at `create` instead of
/// silently running twice.
pub const CONTAINER_NAME_PREFIX: &str = "rce-exec-";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to connect to container runtime: {0}")]
    RuntimeUnavailable(String),
    #[error("image unavailable: {0}")]
    ImageUnavailable(String),
    #[error("sandbox runtime error: {0}")]
    Runtime(String),
}

/// Opaque handle to a created container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
}

/// Everything needed to create one container for one job.
#[derive(Clone, Debug)]
pub struct ContainerSpec {
    /// Deterministic name, e.g. `rce-exec-<jobId>`.
    pub name: String,
    pub image: String,
    pub argv: Vec<String>,
    /// Host-side path of the job's scratch directory, bind-mounted read-only.
    pub host_code_path: String,
    /// Path the code mount appears at inside the container.
    pub sandbox_code_path: String,
    pub env: Vec<String>,
    /// Container labels, e.g. the `SCRATCH_VOLUME_NAME` the job's code mount was allocated
    /// from, for operators inspecting `docker ps`/`docker inspect` output.
    pub labels: HashMap<String, String>,
}

/// The outcome of waiting on a container.
#[derive(Debug)]
pub enum WaitOutcome {
    Exited { exit_code: i64 },
    Cancelled,
}

/// Security profile applied to every container this adapter creates (spec §4.3).
struct SecurityProfile;

impl SecurityProfile {
    const MEMORY_BYTES: i64 = 128 * 1024 * 1024;
    const CPU_PERIOD: i64 = 100_000;
    const CPU_QUOTA: i64 = 50_000;
    const PIDS_LIMIT: i64 = 50;

    fn host_config(spec: &ContainerSpec) -> HostConfig {
        HostConfig {
            binds: Some(vec![format!(
                "{}:{}:ro",
                spec.host_code_path, spec.sandbox_code_path
            )]),
            network_mode: Some("none".to_string()),
            memory: Some(Self::MEMORY_BYTES),
            memory_swap: Some(Self::MEMORY_BYTES), // equal to memory cap: no additional swap
            cpu_period: Some(Self::CPU_PERIOD),
            cpu_quota: Some(Self::CPU_QUOTA),
            pids_limit: Some(Self::PIDS_LIMIT),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            readonly_rootfs: Some(false),
            ..HostConfig::default()
        }
    }
}

/// Wraps a single, lazily-connected Docker client. Constructor-injected into the executor
/// rather than kept as a process-wide static, so tests can substitute a fake.
pub struct SandboxRuntime {
    docker: Docker,
}

impl SandboxRuntime {
    /// Connects to the container runtime control interface. `socket` is the
    /// `SANDBOX_RUNTIME_SOCKET` configuration value: `None` falls back to the platform
    /// default (`DOCKER_HOST`, or the local Unix socket), an `http(s)://` URL connects over
    /// TCP, anything else is treated as a Unix socket path.
    pub fn connect(socket: Option<&str>) -> Result<Self, SandboxError> {
        let connect_result = match socket {
            None => Docker::connect_with_local_defaults(),
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                Docker::connect_with_http(url, 120, bollard::API_DEFAULT_VERSION)
            }
            Some(path) => Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION),
        };
        let docker = connect_result.map_err(|err| SandboxError::RuntimeUnavailable(err.to_string()))?;
        Ok(Self { docker })
    }

    /// If `image` is absent locally, pulls it, streaming the pull progress to the log at
    /// trace level and discarding it otherwise. Idempotent.
    pub async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        let exists = match self.docker.inspect_image(image).await {
            Ok(_) => true,
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => false,
            Err(err) => {
                return Err(SandboxError::ImageUnavailable(format!(
                    "failed to inspect image `{image}`: {err}"
                )))
            }
        };

        if exists {
            return Ok(());
        }

        log::info!("pulling image `{image}`");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(event) = stream.next().await {
            match event {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(SandboxError::ImageUnavailable(format!(
                            "failed to pull image `{image}`: {error}"
                        )));
                    }
                    if let Some(status) = info.status {
                        log::trace!("pull {image}: {status}");
                    }
                }
                Err(err) => {
                    return Err(SandboxError::ImageUnavailable(format!(
                        "failed to pull image `{image}`: {err}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Creates the container. Does not start it. A duplicate name (e.g. a redelivered job
    /// racing its first attempt) fails loudly rather than silently double-running.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, SandboxError> {
        let mut env = spec.env.clone();
        env.push("HOME=/tmp".to_string());

        let config = Config {
            image: Some(spec.image.clone()),
            entrypoint: Some(spec.argv.clone()),
            working_dir: Some(spec.sandbox_code_path.clone()),
            env: Some(env),
            user: Some("nobody".to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            attach_stdin: Some(false),
            open_stdin: Some(false),
            host_config: Some(SecurityProfile::host_config(spec)),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|err| {
                SandboxError::Runtime(format!(
                    "failed to create container `{}`: {err}",
                    spec.name
                ))
            })?;

        Ok(ContainerHandle { id: container.id })
    }

    pub async fn start(&self, handle: &ContainerHandle) -> Result<(), SandboxError> {
        self.docker
            .start_container::<String>(&handle.id, None)
            .await
            .map_err(|err| {
                SandboxError::Runtime(format!("failed to start container `{}`: {err}", handle.id))
            })
    }

    /// Blocks until the container exits or `cancel` fires, whichever happens first.
    pub async fn wait(
        &self,
        handle: &ContainerHandle,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, SandboxError> {
        let mut stream = self.docker.wait_container::<String>(&handle.id, None);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(WaitOutcome::Cancelled),
            result = stream.next() => match result {
                Some(Ok(response)) => Ok(WaitOutcome::Exited {
                    exit_code: response.status_code,
                }),
                Some(Err(DockerError::DockerContainerWaitError { code, .. })) => {
                    Ok(WaitOutcome::Exited { exit_code: code })
                }
                Some(Err(err)) => Err(SandboxError::Runtime(format!(
                    "failed to wait for container `{}`: {err}",
                    handle.id
                ))),
                None => Err(SandboxError::Runtime(format!(
                    "wait stream for container `{}` closed with no result",
                    handle.id
                ))),
            },
        }
    }

    /// Delivers the equivalent of SIGKILL. Tolerant of containers that have already exited.
    pub async fn kill(&self, handle: &ContainerHandle) -> Result<(), SandboxError> {
        match self
            .docker
            .kill_container(&handle.id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
        {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404 | 409,
                ..
            }) => Ok(()),
            Err(err) => Err(SandboxError::Runtime(format!(
                "failed to kill container `{}`: {err}",
                handle.id
            ))),
        }
    }

    /// Retrieves the full captured streams, demultiplexing the runtime's framed log output
    /// into separate stdout/stderr buffers.
    pub async fn logs(&self, handle: &ContainerHandle) -> Result<(String, String), SandboxError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(&handle.id, Some(options));

        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => {
                    stdout.push_str(&String::from_utf8_lossy(&message))
                }
                Ok(LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message))
                }
                Ok(_) => {}
                Err(err) => {
                    return Err(SandboxError::Runtime(format!(
                        "failed to read logs for container `{}`: {err}",
                        handle.id
                    )))
                }
            }
        }
        Ok((stdout, stderr))
    }

    /// Force-removes the container and any anonymous volumes. Idempotent.
    pub async fn remove(&self, handle: &ContainerHandle) -> Result<(), SandboxError> {
        match self
            .docker
            .remove_container(
                &handle.id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(err) => Err(SandboxError::Runtime(format!(
                "failed to remove container `{}`: {err}",
                handle.id
            ))),
        }
    }
}

/// Container name deterministically derived from a job id (spec §4.4 step 6).
pub fn container_name(job_id: &str) -> String {
    format!("{CONTAINER_NAME_PREFIX}{job_id}")
}

/// Grace period allotted to a fresh, non-cancelled context used to kill a container whose
/// own timeout context has already fired (spec §4.4 step 10).
pub const KILL_GRACE: Duration = Duration::from_secs(10);

/// Build the minimal, hygienic environment for a language, beyond the `HOME=/tmp` that
/// [`SandboxRuntime::create`] always sets: disable interpreter bytecode caches, since the
/// code mount is read-only and a stray `__pycache__` write would otherwise fail loudly.
pub fn language_hygiene_env(executor: &str) -> Vec<String> {
    match executor {
        "python3" => vec!["PYTHONDONTWRITEBYTECODE=1".to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_is_deterministic_per_job() {
        assert_eq!(container_name("abc123"), "rce-exec-abc123");
        assert_eq!(container_name("abc123"), container_name("abc123"));
        assert_ne!(container_name("abc123"), container_name("xyz789"));
    }

    #[test]
    fn python_gets_bytecode_hygiene_env() {
        let env = language_hygiene_env("python3");
        assert_eq!(env, vec!["PYTHONDONTWRITEBYTECODE=1".to_string()]);
    }

    #[test]
    fn unrelated_executor_gets_no_extra_env() {
        assert!(language_hygiene_env("node").is_empty());
    }

    #[test]
    fn host_config_caps_match_security_profile() {
        let spec = ContainerSpec {
            name: container_name("job-x"),
            image: "python:3.11-slim".to_string(),
            argv: vec!["python3".to_string(), "/code/job-x/script.py".to_string()],
            host_code_path: "/tmp/executions/job-x".to_string(),
            sandbox_code_path: "/code/job-x".to_string(),
            env: Vec::new(),
            labels: HashMap::new(),
        };
        let host_config = SecurityProfile::host_config(&spec);
        assert_eq!(host_config.memory, Some(128 * 1024 * 1024));
        assert_eq!(host_config.memory_swap, host_config.memory);
        assert_eq!(host_config.pids_limit, Some(50));
        assert_eq!(host_config.network_mode.as_deref(), Some("none"));
        assert_eq!(host_config.cap_drop, Some(vec!["ALL".to_string()]));
    }
}
