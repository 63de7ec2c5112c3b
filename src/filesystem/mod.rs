// src/filesystem/mod.rs

//! Transactional file operations
//!
//! Every mutating primitive runs under a bounded retry so that files held
//! briefly by installers or scanners do not fail an operation. When the retry
//! budget is spent the last I/O error is returned unchanged.

pub mod attributes;

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Attempts made before an I/O error is surfaced
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay after the first failed attempt
const INITIAL_DELAY_MS: u64 = 200;

/// Extra delay added for every following attempt
const DELAY_INCREMENT_MS: u64 = 100;

/// Bounded linear backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub increment: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
            increment: Duration::from_millis(DELAY_INCREMENT_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay slept after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay + self.increment * attempt.saturating_sub(1)
    }

    /// Total time spent sleeping before the final attempt
    pub fn total_backoff(&self) -> Duration {
        (1..self.attempts).map(|attempt| self.delay_after(attempt)).sum()
    }

    /// Run `op` until it succeeds or the attempt budget is spent
    pub fn run<T>(
        &self,
        description: &str,
        silent: bool,
        mut op: impl FnMut() -> io::Result<T>,
    ) -> io::Result<T> {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    if silent {
                        debug!(
                            "{} attempt {} failed: {}, retrying in {:?}",
                            description, attempt, e, delay
                        );
                    } else {
                        warn!(
                            "{} attempt {} failed: {}, retrying in {:?}",
                            description, attempt, e, delay
                        );
                    }
                    thread::sleep(delay);
                }
            }
        }
    }
}

/// Retrying, attribute-aware file and directory primitives
#[derive(Debug, Clone, Default)]
pub struct FileOperator {
    retry: RetryPolicy,
    silent: bool,
}

impl FileOperator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self {
            retry,
            silent: false,
        }
    }

    /// Log retries at debug level instead of warn
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn retry<T>(&self, description: &str, op: impl FnMut() -> io::Result<T>) -> Result<T> {
        Ok(self.retry.run(description, self.silent, op)?)
    }

    pub fn create_directory(&self, path: &Path) -> Result<()> {
        self.retry(&format!("create directory {}", path.display()), || {
            fs::create_dir_all(path)
        })
    }

    pub fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        ensure_not_filesystem_root(path)?;
        if path.exists() && attributes::effective_attributes(path)?.is_restrictive() {
            attributes::strip_restrictive(path)?;
        }
        debug!("Writing {}", path.display());
        self.retry(&format!("write {}", path.display()), || fs::write(path, contents))
    }

    pub fn copy_file(&self, source: &Path, destination: &Path, overwrite: bool) -> Result<()> {
        if destination.exists() {
            if !overwrite {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} already exists", destination.display()),
                )));
            }
            if attributes::effective_attributes(destination)?.is_restrictive() {
                attributes::strip_restrictive(destination)?;
            }
        }
        if let Some(parent) = destination.parent() {
            self.create_directory(parent)?;
        }

        debug!("Copying {} to {}", source.display(), destination.display());
        self.retry(&format!("copy {}", source.display()), || {
            fs::copy(source, destination).map(|_| ())
        })
    }

    pub fn move_file(&self, source: &Path, destination: &Path) -> Result<()> {
        ensure_not_filesystem_root(source)?;
        ensure_not_filesystem_root(destination)?;
        if let Some(parent) = destination.parent() {
            self.create_directory(parent)?;
        }

        debug!("Moving {} to {}", source.display(), destination.display());
        self.retry(&format!("move {}", source.display()), || {
            match fs::rename(source, destination) {
                Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                    fs::copy(source, destination)?;
                    fs::remove_file(source)
                }
                other => other,
            }
        })
    }

    pub fn delete_file(&self, path: &Path) -> Result<()> {
        ensure_not_filesystem_root(path)?;
        if !path.exists() {
            return Ok(());
        }
        if attributes::effective_attributes(path)?.is_restrictive() {
            attributes::strip_restrictive(path)?;
        }

        debug!("Deleting {}", path.display());
        self.retry(&format!("delete {}", path.display()), || {
            match fs::remove_file(path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        })
    }

    pub fn copy_directory(&self, source: &Path, destination: &Path, overwrite: bool) -> Result<()> {
        self.create_directory(destination)?;
        for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
            let entry = entry?;
            let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
            let target = destination.join(relative);
            if entry.file_type().is_dir() {
                self.create_directory(&target)?;
            } else {
                self.copy_file(entry.path(), &target, overwrite)?;
            }
        }
        Ok(())
    }

    /// Move a directory, falling back to copy-then-delete when a rename fails
    pub fn move_directory(&self, source: &Path, destination: &Path) -> Result<()> {
        ensure_not_filesystem_root(source)?;
        ensure_not_filesystem_root(destination)?;
        if let Some(parent) = destination.parent() {
            self.create_directory(parent)?;
        }

        debug!("Moving directory {} to {}", source.display(), destination.display());
        let renamed = self.retry(&format!("move directory {}", source.display()), || {
            fs::rename(source, destination)
        });
        match renamed {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    "Rename of {} failed ({}), copying instead",
                    source.display(),
                    e
                );
                self.copy_directory(source, destination, true)?;
                self.delete_directory(source, true, true)
            }
        }
    }

    /// Delete a directory.
    ///
    /// With `override_attributes` every contained entry has readonly, hidden and
    /// system stripped first; otherwise the OS call fails on protected files.
    pub fn delete_directory(
        &self,
        path: &Path,
        recursive: bool,
        override_attributes: bool,
    ) -> Result<()> {
        ensure_not_filesystem_root(path)?;
        if !path.exists() {
            return Ok(());
        }

        if override_attributes {
            for entry in walk(path)? {
                attributes::strip_restrictive(&entry)?;
            }
            attributes::strip_restrictive(path)?;
        }

        debug!("Deleting directory {}", path.display());
        self.retry(&format!("delete directory {}", path.display()), || {
            let removed = if recursive {
                fs::remove_dir_all(path)
            } else {
                fs::remove_dir(path)
            };
            match removed {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        })
    }

    /// Put `source` in place of `destination`, keeping the old file at `backup`.
    ///
    /// The three steps (move destination to backup, copy source over
    /// destination, delete source) run in order and each logs its own failure.
    /// A failed backup or source cleanup does not stop the replace; a failed
    /// copy leaves the source in place and is returned. Re-running with the same
    /// backup path overwrites any stale backup.
    pub fn replace_file(&self, source: &Path, destination: &Path, backup: &Path) -> Result<()> {
        if destination.exists() {
            let moved = self
                .delete_file(backup)
                .and_then(|()| self.move_file(destination, backup));
            if let Err(e) = moved {
                warn!(
                    "Unable to back up {} to {}: {}",
                    destination.display(),
                    backup.display(),
                    e
                );
            }
        }

        if let Err(e) = self.copy_file(source, destination, true) {
            warn!(
                "Unable to copy {} to {}: {}",
                source.display(),
                destination.display(),
                e
            );
            return Err(e);
        }

        if let Err(e) = self.delete_file(source) {
            warn!("Unable to remove {}: {}", source.display(), e);
        }
        Ok(())
    }
}

/// Reject paths that collapse to a filesystem root (`/`, `C:\`) or to nothing
pub fn ensure_not_filesystem_root(path: &Path) -> Result<()> {
    let normalized = normalize(path);
    if normalized.as_os_str().is_empty() || normalized.parent().is_none() {
        return Err(Error::FilesystemRoot(path.to_path_buf()));
    }
    Ok(())
}

/// Lexically resolve `.` and `..` without touching the filesystem
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// All files and directories below `root`, parents before children
pub fn walk(root: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        entries.push(entry?.into_path());
    }
    Ok(entries)
}

/// SHA-256 of a file's contents as lowercase hex
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 32 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast_operator() -> FileOperator {
        FileOperator::with_retry(RetryPolicy {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            increment: Duration::from_millis(1),
        })
    }

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay_after(1), Duration::from_millis(200));
        assert_eq!(policy.delay_after(2), Duration::from_millis(300));
        assert_eq!(policy.total_backoff(), Duration::from_millis(500));
    }

    #[test]
    fn test_retry_recovers_within_budget() {
        let policy = *fast_operator().retry_policy();
        let calls = Cell::new(0);
        let result = policy.run("locked", true, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "in use"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_gives_up_after_three_attempts() {
        let policy = *fast_operator().retry_policy();
        let calls = Cell::new(0);
        let result: io::Result<()> = policy.run("locked", true, || {
            calls.set(calls.get() + 1);
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "still in use"))
        });
        let err = result.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(err.to_string(), "still in use");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_root_guard() {
        assert!(matches!(
            ensure_not_filesystem_root(Path::new("/")),
            Err(Error::FilesystemRoot(_))
        ));
        assert!(ensure_not_filesystem_root(Path::new("/tmp/..")).is_err());
        assert!(ensure_not_filesystem_root(Path::new("")).is_err());
        assert!(ensure_not_filesystem_root(Path::new("/tmp/choco")).is_ok());
    }

    #[test]
    fn test_delete_directory_refuses_root_without_io() {
        let op = fast_operator();
        let err = op.delete_directory(Path::new("/usr/.."), true, true).unwrap_err();
        assert!(err.is_fatal());
        assert!(Path::new("/usr").exists());

        let err = op
            .move_directory(Path::new("/"), Path::new("/tmp/nowhere"))
            .unwrap_err();
        assert!(matches!(err, Error::FilesystemRoot(_)));

        let err = op.delete_file(Path::new("/")).unwrap_err();
        assert!(matches!(err, Error::FilesystemRoot(_)));
        assert!(err.is_fatal());
        assert!(op.delete_file(Path::new("/tmp/../")).unwrap_err().is_fatal());
    }

    #[test]
    fn test_copy_directory_and_walk() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("tools").join("bin")).unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();
        fs::write(src.join("readme.txt"), "top").unwrap();
        fs::write(src.join("tools").join("bin").join("app.exe"), "bin").unwrap();

        let found = walk(&src).unwrap();
        assert_eq!(found.len(), 5);
        assert!(!found.contains(&src));
        let tools = found.iter().position(|p| *p == src.join("tools")).unwrap();
        let bin = found
            .iter()
            .position(|p| *p == src.join("tools").join("bin"))
            .unwrap();
        assert!(tools < bin);

        let dst = temp.path().join("dst");
        fast_operator().copy_directory(&src, &dst, false).unwrap();
        assert_eq!(fs::read_to_string(dst.join("readme.txt")).unwrap(), "top");
        assert_eq!(
            fs::read_to_string(dst.join("tools").join("bin").join("app.exe")).unwrap(),
            "bin"
        );
        assert!(dst.join("empty").is_dir());
        assert!(fast_operator().copy_directory(&src, &dst, false).is_err());
    }

    #[test]
    fn test_write_file_replaces_readonly_file() {
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join(".pending");
        let op = fast_operator();

        op.write_file(&marker, "demo 1.0.0").unwrap();
        attributes::set_readonly(&marker, true).unwrap();
        op.write_file(&marker, "demo 2.0.0").unwrap();
        assert_eq!(fs::read_to_string(&marker).unwrap(), "demo 2.0.0");

        let missing_parent = temp.path().join("nope").join("file");
        assert!(matches!(op.write_file(&missing_parent, "x"), Err(Error::Io(_))));
    }

    #[test]
    fn test_copy_without_overwrite_fails_when_present() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("a.txt");
        let dst = temp.path().join("b.txt");
        fs::write(&src, "new").unwrap();
        fs::write(&dst, "old").unwrap();

        let op = fast_operator();
        assert!(op.copy_file(&src, &dst, false).is_err());
        op.copy_file(&src, &dst, true).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "new");
    }

    #[test]
    fn test_replace_file_keeps_backup() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("incoming.dll");
        let destination = temp.path().join("app.dll");
        let backup = temp.path().join("app.dll.bak");
        fs::write(&source, "v2").unwrap();
        fs::write(&destination, "v1").unwrap();
        fs::write(&backup, "stale").unwrap();

        fast_operator()
            .replace_file(&source, &destination, &backup)
            .unwrap();

        assert_eq!(fs::read_to_string(&destination).unwrap(), "v2");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "v1");
        assert!(!source.exists());
    }

    #[test]
    fn test_replace_file_is_rerunnable() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("incoming.txt");
        let destination = temp.path().join("current.txt");
        let backup = temp.path().join("current.bak");
        let op = fast_operator();

        fs::write(&source, "one").unwrap();
        op.replace_file(&source, &destination, &backup).unwrap();
        assert!(!backup.exists());

        fs::write(&source, "two").unwrap();
        op.replace_file(&source, &destination, &backup).unwrap();
        fs::write(&source, "three").unwrap();
        op.replace_file(&source, &destination, &backup).unwrap();

        assert_eq!(fs::read_to_string(&destination).unwrap(), "three");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "two");
    }

    #[test]
    fn test_replace_file_missing_source_keeps_backup_record() {
        let temp = tempfile::tempdir().unwrap();
        let destination = temp.path().join("current.txt");
        let backup = temp.path().join("current.bak");
        fs::write(&destination, "original").unwrap();

        let result = fast_operator().replace_file(
            &temp.path().join("missing.txt"),
            &destination,
            &backup,
        );
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&backup).unwrap(), "original");
    }

    #[test]
    fn test_delete_directory_with_readonly_content() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("pkg");
        fs::create_dir_all(dir.join("tools")).unwrap();
        let locked = dir.join("tools").join("locked.exe");
        fs::write(&locked, "bin").unwrap();
        attributes::set_readonly(&locked, true).unwrap();

        fast_operator().delete_directory(&dir, true, true).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_move_directory() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested").join("f.txt"), "data").unwrap();
        let dst = temp.path().join("elsewhere").join("dst");

        fast_operator().move_directory(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(
            fs::read_to_string(dst.join("nested").join("f.txt")).unwrap(),
            "data"
        );
    }

    #[test]
    fn test_file_checksum() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("hello.txt");
        fs::write(&file, "hello").unwrap();
        assert_eq!(
            file_checksum(&file).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
