// Copyright 2026 RCE project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::Duration;

use crate::error::DispatcherError;

/// Process configuration, read once at startup from the environment variables enumerated
/// in spec §6. Modeled as an explicit, constructor-injected value rather than scattered
/// `env::var` calls throughout the dispatcher loop (spec §9, "Global mutable state →
/// explicit collaborators").
#[derive(Clone, Debug)]
pub struct Config {
    pub queue_url: String,
    pub record_store_url: String,
    pub scratch_volume_name: String,
    pub scratch_host_path: String,
    pub sandbox_runtime_socket: String,
    /// Bounded worker pool size (spec §4.5: "Implementations MAY run N parallel Executor
    /// invocations behind a bounded work-stealing pool").
    pub concurrency: usize,
    /// Grace window the current job is given to unwind through cleanup on shutdown.
    pub shutdown_grace: Duration,
}

const SCRATCH_HOST_PATH_DEFAULT: &str = "/tmp/executions";
const CONCURRENCY_DEFAULT: usize = 1;
const SHUTDOWN_GRACE_SECONDS_DEFAULT: u64 = 2;

impl Config {
    pub fn from_env() -> Result<Self, DispatcherError> {
        Ok(Self {
            queue_url: required("QUEUE_URL")?,
            record_store_url: required("RECORD_STORE_URL")?,
            scratch_volume_name: required("SCRATCH_VOLUME_NAME")?,
            scratch_host_path: optional("SCRATCH_HOST_PATH", SCRATCH_HOST_PATH_DEFAULT),
            sandbox_runtime_socket: required("SANDBOX_RUNTIME_SOCKET")?,
            concurrency: optional_parsed("DISPATCHER_CONCURRENCY", CONCURRENCY_DEFAULT)?,
            shutdown_grace: Duration::from_secs(optional_parsed(
                "SHUTDOWN_GRACE_SECONDS",
                SHUTDOWN_GRACE_SECONDS_DEFAULT,
            )?),
        })
    }
}

fn required(key: &str) -> Result<String, DispatcherError> {
    std::env::var(key).map_err(|_| DispatcherError::MissingConfig(key.to_string()))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, DispatcherError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| DispatcherError::InvalidConfig(key.to_string(), raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for key in [
            "QUEUE_URL",
            "RECORD_STORE_URL",
            "SCRATCH_VOLUME_NAME",
            "SCRATCH_HOST_PATH",
            "SANDBOX_RUNTIME_SOCKET",
            "DISPATCHER_CONCURRENCY",
            "SHUTDOWN_GRACE_SECONDS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn missing_required_variable_is_reported_by_name() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, DispatcherError::MissingConfig(key) if key == "QUEUE_URL"));
    }

    #[test]
    fn defaults_apply_when_optional_variables_are_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("QUEUE_URL", "redis://localhost:6379");
        std::env::set_var("RECORD_STORE_URL", "redis://localhost:6379");
        std::env::set_var("SCRATCH_VOLUME_NAME", "executions");
        std::env::set_var("SANDBOX_RUNTIME_SOCKET", "/var/run/docker.sock");

        let config = Config::from_env().unwrap();
        assert_eq!(config.scratch_host_path, SCRATCH_HOST_PATH_DEFAULT);
        assert_eq!(config.concurrency, CONCURRENCY_DEFAULT);
        assert_eq!(
            config.shutdown_grace,
            Duration::from_secs(SHUTDOWN_GRACE_SECONDS_DEFAULT)
        );
        clear_all();
    }

    #[test]
    fn invalid_concurrency_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("QUEUE_URL", "redis://localhost:6379");
        std::env::set_var("RECORD_STORE_URL", "redis://localhost:6379");
        std::env::set_var("SCRATCH_VOLUME_NAME", "executions");
        std::env::set_var("SANDBOX_RUNTIME_SOCKET", "/var/run/docker.sock");
        std::env::set_var("DISPATCHER_CONCURRENCY", "not-a-number");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, DispatcherError::InvalidConfig(key, _) if key == "DISPATCHER_CONCURRENCY"));
        clear_all();
    }
}
