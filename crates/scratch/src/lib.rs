// Copyright 2026 RCE project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Per-job scratch directories on a volume shared between the dispatcher process and the
//! sandbox containers it spawns.

use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use thiserror::Error;

/// A directory that is never visible to more than one job, identified by the job's id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScratchSlot {
    /// Where the dispatcher process sees the directory.
    pub host_path: PathBuf,
    /// Where the same directory is mounted inside the sandbox container.
    pub sandbox_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum ScratchError {
    #[error("scratch directory unavailable: {0}")]
    Unavailable(String),
}

/// Allocates and reclaims per-job directories under a host root that is bind-mounted into
/// sandbox containers at a separate, fixed path.
#[derive(Clone, Debug)]
pub struct ScratchManager {
    host_root: PathBuf,
    sandbox_root: PathBuf,
    volume_name: String,
}

impl ScratchManager {
    /// `volume_name` is the `SCRATCH_VOLUME_NAME` configuration value: the named shared
    /// volume `host_root` lives on. It is not used to construct the bind mount itself (that
    /// addresses a job's directory by host path, per [`ScratchSlot::host_path`]) but is
    /// threaded through to the sandbox runtime so created containers stay traceable to the
    /// volume they were allocated from.
    pub fn new(
        host_root: impl Into<PathBuf>,
        sandbox_root: impl Into<PathBuf>,
        volume_name: impl Into<String>,
    ) -> Self {
        Self {
            host_root: host_root.into(),
            sandbox_root: sandbox_root.into(),
            volume_name: volume_name.into(),
        }
    }

    pub fn volume_name(&self) -> &str {
        &self.volume_name
    }

    /// Ensures the shared host root itself exists, mode 0755. Called once at dispatcher
    /// startup; per-job directories are created by [`ScratchManager::allocate`].
    pub async fn ensure_root(&self) -> Result<(), ScratchError> {
        create_dir_0755(&self.host_root).await
    }

    /// Creates `<host_root>/<job_id>/`, mode 0755.
    pub async fn allocate(&self, job_id: &str) -> Result<ScratchSlot, ScratchError> {
        let host_path = self.host_root.join(job_id);
        create_dir_0755(&host_path).await?;

        let slot = ScratchSlot {
            host_path,
            sandbox_path: self.sandbox_root.join(job_id),
        };
        log::debug!("allocated scratch slot at {}", slot.host_path.display());
        Ok(slot)
    }

    /// Writes `<slot.host_path>/<filename>`, mode 0644, overwriting any existing file.
    pub async fn write_code(
        &self,
        slot: &ScratchSlot,
        filename: &str,
        bytes: &[u8],
    ) -> Result<(), ScratchError> {
        let path = slot.host_path.join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| ScratchError::Unavailable(format!("failed to write {path:?}: {err}")))?;
        set_mode(&path, 0o644).await?;
        Ok(())
    }

    /// Recursively removes the job's directory. Best-effort: failures are logged, never
    /// surfaced, since a janitor process is expected to sweep anything leaked here.
    pub async fn release(&self, slot: ScratchSlot) {
        if let Err(err) = tokio::fs::remove_dir_all(&slot.host_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "failed to release scratch slot {}: {err}",
                    slot.host_path.display()
                );
            }
        }
    }
}

async fn create_dir_0755(path: &Path) -> Result<(), ScratchError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|err| ScratchError::Unavailable(format!("failed to create {path:?}: {err}")))?;
    set_mode(path, 0o755).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), ScratchError> {
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|err| {
            ScratchError::Unavailable(format!("failed to set permissions on {path:?}: {err}"))
        })
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<(), ScratchError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocate_creates_host_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ScratchManager::new(tmp.path(), "/code", "test-volume");
        let slot = manager.allocate("job-1").await.unwrap();
        assert!(slot.host_path.is_dir());
        assert_eq!(slot.sandbox_path, Path::new("/code/job-1"));
    }

    #[tokio::test]
    async fn write_code_creates_file_with_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ScratchManager::new(tmp.path(), "/code", "test-volume");
        let slot = manager.allocate("job-2").await.unwrap();
        manager
            .write_code(&slot, "script.py", b"print(1)")
            .await
            .unwrap();
        let contents = tokio::fs::read(slot.host_path.join("script.py"))
            .await
            .unwrap();
        assert_eq!(contents, b"print(1)");
    }

    #[tokio::test]
    async fn release_removes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ScratchManager::new(tmp.path(), "/code", "test-volume");
        let slot = manager.allocate("job-3").await.unwrap();
        let host_path = slot.host_path.clone();
        manager.release(slot).await;
        assert!(!host_path.exists());
    }

    #[tokio::test]
    async fn release_of_missing_directory_does_not_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ScratchManager::new(tmp.path(), "/code", "test-volume");
        let slot = ScratchSlot {
            host_path: tmp.path().join("never-created"),
            sandbox_path: PathBuf::from("/code/never-created"),
        };
        manager.release(slot).await;
    }

    #[tokio::test]
    async fn two_jobs_get_disjoint_slots() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ScratchManager::new(tmp.path(), "/code", "test-volume");
        let a = manager.allocate("job-a").await.unwrap();
        let b = manager.allocate("job-b").await.unwrap();
        assert_ne!(a.host_path, b.host_path);
    }
}
