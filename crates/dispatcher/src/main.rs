// Copyright 2026 RCE project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

mod broadcaster;
mod config;
mod error;
mod job;
mod queue;
mod record_store;
mod worker;

use std::sync::Arc;

use executor::Executor;
use registry::LanguageRegistry;
use sandbox::SandboxRuntime;
use scratch::ScratchManager;
use tokio_util::sync::CancellationToken;

use broadcaster::{RedisBroadcaster, ANALYSIS_QUEUE};
use config::Config;
use queue::{RedisWorkQueue, SUBMISSION_QUEUE};
use record_store::RedisRecordStore;
use worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;

    let queue = RedisWorkQueue::connect(&config.queue_url, SUBMISSION_QUEUE).await?;
    let record_store = RedisRecordStore::connect(&config.record_store_url).await?;
    // The record store and analysis channel share a Redis deployment; the spec names no
    // separate broadcast endpoint.
    let broadcaster = RedisBroadcaster::connect(&config.record_store_url, ANALYSIS_QUEUE).await?;

    let registry = LanguageRegistry::with_defaults();
    log::info!("supported languages: {:?}", registry.supported());

    let scratch = ScratchManager::new(
        config.scratch_host_path.clone(),
        "/code",
        config.scratch_volume_name.clone(),
    );
    scratch.ensure_root().await?;

    let sandbox = SandboxRuntime::connect(Some(&config.sandbox_runtime_socket))?;
    let executor = Arc::new(Executor::new(registry, scratch, sandbox));

    let worker = Worker {
        queue: Arc::new(queue),
        record_store: Arc::new(record_store),
        broadcaster: Arc::new(broadcaster),
        executor,
        concurrency: config.concurrency,
    };

    let shutdown = CancellationToken::new();
    let worker_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    wait_for_shutdown_signal().await;
    log::info!("shutdown signal received, cancelling in-flight jobs");
    shutdown.cancel();

    tokio::select! {
        result = worker_handle => {
            match result {
                Ok(()) => log::info!("dispatcher loop drained cleanly"),
                Err(err) => log::error!("dispatcher loop task panicked: {err}"),
            }
        }
        _ = tokio::time::sleep(config.shutdown_grace) => {
            log::warn!("shutdown grace period elapsed; exiting with work possibly still in flight");
        }
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
