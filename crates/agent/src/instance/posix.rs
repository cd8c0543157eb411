// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! POSIX instance lock: `O_WRONLY|O_CREAT|O_TRUNC` plus an advisory
//! exclusive non-blocking lock via `fs2`, directly grounded on
//! `other_examples/...oddjobs__crates-daemon-src-lifecycle-mod.rs`'s
//! `try_lock_exclusive` use.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::InstanceError;

pub struct InstanceHandler {
    path: PathBuf,
    file: File,
    owns_lock: bool,
}

impl InstanceHandler {
    /// Acquire the lock, creating the run directory and lock file as needed.
    pub fn try_acquire(run_dir: &Path) -> Result<Self, InstanceError> {
        std::fs::create_dir_all(run_dir)?;
        let path = super::lock_file_path(run_dir);
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { path, file, owns_lock: true }),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Err(InstanceError::AlreadyRunning),
            Err(err) => Err(InstanceError::Io(err)),
        }
    }
}

impl Drop for InstanceHandler {
    fn drop(&mut self) {
        if self.owns_lock {
            let _ = fs2::FileExt::unlock(&self.file);
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_attempt_reports_already_running() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let first = InstanceHandler::try_acquire(dir.path()).unwrap_or_else(|e| panic!("first lock: {e}"));

        let second = InstanceHandler::try_acquire(dir.path());
        assert!(matches!(second, Err(InstanceError::AlreadyRunning)));

        drop(first);
        let third = InstanceHandler::try_acquire(dir.path());
        assert!(third.is_ok(), "lock must be acquirable again after the owner drops");
    }

    #[test]
    fn lock_file_removed_only_by_owner() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let handler = InstanceHandler::try_acquire(dir.path()).unwrap_or_else(|e| panic!("lock: {e}"));
        let path = handler.path.clone();
        assert!(path.exists());
        drop(handler);
        assert!(!path.exists());
    }
}
