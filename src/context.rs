// src/context.rs

//! Install Context
//!
//! Filesystem roots for one logical operation. A context is built once at the
//! top of an operation and passed down explicitly; concurrent operations each
//! own their own instance, so parallel runs never share root paths.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the package information database under the state directory
const PACKAGE_DB_NAME: &str = "packages.db";

/// Name of the file config under the config directory
const CONFIG_FILE_NAME: &str = "chocolatey.config";

/// Marker left in a package folder while an install is in flight
pub const PENDING_MARKER: &str = ".chocolateyPending";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallContext {
    root: PathBuf,
    packages_override: Option<PathBuf>,
    cache_override: Option<PathBuf>,
    temp_override: Option<PathBuf>,
    native_registry_override: Option<PathBuf>,
}

impl InstallContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            packages_override: None,
            cache_override: None,
            temp_override: None,
            native_registry_override: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move the context to a new root.
    ///
    /// Any custom packages location is dropped so the packages folder follows
    /// the new root instead of pointing at the old tree.
    pub fn set_root(&mut self, root: impl Into<PathBuf>) {
        self.root = root.into();
        self.packages_override = None;
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.packages_override
            .clone()
            .unwrap_or_else(|| self.root.join("lib"))
    }

    pub fn set_packages_dir(&mut self, dir: impl Into<PathBuf>) {
        self.packages_override = Some(dir.into());
    }

    pub fn bad_packages_dir(&self) -> PathBuf {
        self.root.join("lib-bad")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("lib-bkp")
    }

    pub fn shims_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.root.join("extensions")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join(CONFIG_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".chocolatey")
    }

    pub fn package_db_path(&self) -> PathBuf {
        self.state_dir().join(PACKAGE_DB_NAME)
    }

    pub fn native_registry_path(&self) -> PathBuf {
        self.native_registry_override
            .clone()
            .unwrap_or_else(|| self.root.join(".registry").join("software.db"))
    }

    /// Point the native registry store at a shared location
    pub fn set_native_registry_path(&mut self, path: impl Into<PathBuf>) {
        self.native_registry_override = Some(path.into());
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_override
            .clone()
            .unwrap_or_else(|| self.root.join("cache"))
    }

    pub fn set_cache_dir(&mut self, dir: impl Into<PathBuf>) {
        self.cache_override = Some(dir.into());
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_override
            .clone()
            .unwrap_or_else(|| self.cache_dir().join("temp"))
    }

    pub fn set_temp_dir(&mut self, dir: impl Into<PathBuf>) {
        self.temp_override = Some(dir.into());
    }

    /// Scratch directory for a script invocation on the calling thread
    pub fn script_temp_dir(&self) -> PathBuf {
        self.temp_dir()
            .join(std::process::id().to_string())
            .join(current_thread_number())
    }

    /// Fixed location for script working directories kept for inspection
    pub fn script_diagnostics_dir(&self) -> PathBuf {
        self.cache_dir().join("script-diagnostics")
    }

    /// Folder an archive package is extracted into
    pub fn package_install_dir(&self, id: &str, version: Option<&str>) -> PathBuf {
        match version {
            Some(version) => self.packages_dir().join(format!("{id}.{version}")),
            None => self.packages_dir().join(id),
        }
    }

    pub fn package_backup_dir(&self, id: &str) -> PathBuf {
        self.backup_dir().join(id)
    }

    pub fn bad_package_dir(&self, id: &str, version: &str) -> PathBuf {
        self.bad_packages_dir().join(id).join(version)
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.packages_dir(),
            self.bad_packages_dir(),
            self.backup_dir(),
            self.shims_dir(),
            self.extensions_dir(),
            self.templates_dir(),
            self.config_dir(),
            self.logs_dir(),
            self.state_dir(),
            self.cache_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| {
                Error::Fatal(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        debug!("Install root ready at {}", self.root.display());
        Ok(())
    }
}

fn current_thread_number() -> String {
    // ThreadId only exposes its number through Debug ("ThreadId(7)")
    let raw = format!("{:?}", std::thread::current().id());
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() { raw } else { digits }
}
