// src/source.rs

//! Package sources
//!
//! A source answers "which archive satisfies this id and version query".
//! `LocalFolderSource` scans directories of `.nupkg` files.

use crate::error::Result;
use crate::packages::{ARCHIVE_EXTENSION, PackageArchive};
use crate::version::{PackageVersion, VersionRange};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Version constraints for a lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionQuery {
    pub exact: Option<PackageVersion>,
    pub prerelease: bool,
    /// Only versions strictly newer than this
    pub newer_than: Option<PackageVersion>,
    pub range: Option<VersionRange>,
}

impl VersionQuery {
    pub fn latest(prerelease: bool) -> Self {
        Self {
            prerelease,
            ..Default::default()
        }
    }

    pub fn exact(version: PackageVersion) -> Self {
        Self {
            exact: Some(version),
            ..Default::default()
        }
    }

    pub fn newer_than(mut self, version: PackageVersion) -> Self {
        self.newer_than = Some(version);
        self
    }

    pub fn within(mut self, range: VersionRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn accepts(&self, version: &PackageVersion) -> bool {
        if let Some(exact) = &self.exact {
            return version == exact;
        }
        if version.is_prerelease() && !self.prerelease {
            return false;
        }
        if self.newer_than.as_ref().is_some_and(|floor| version <= floor) {
            return false;
        }
        self.range.as_ref().is_none_or(|range| range.satisfies(version))
    }
}

pub trait PackageSource {
    /// Human-readable name used in messages
    fn name(&self) -> String;

    /// Highest version of `id` accepted by `query`
    fn find_package(&self, id: &str, query: &VersionQuery) -> Result<Option<PackageArchive>>;
}

/// Directories of package archives
#[derive(Debug, Clone, Default)]
pub struct LocalFolderSource {
    dirs: Vec<PathBuf>,
}

impl LocalFolderSource {
    pub fn new(dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            dirs: dirs.into_iter().collect(),
        }
    }

    /// Every readable archive in the configured directories
    pub fn archives(&self) -> Result<Vec<PackageArchive>> {
        let mut archives = Vec::new();
        for dir in &self.dirs {
            if !dir.is_dir() {
                debug!("Source directory {} does not exist", dir.display());
                continue;
            }
            let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
                })
                .collect();
            paths.sort();

            for path in paths {
                match PackageArchive::open(&path) {
                    Ok(archive) => archives.push(archive),
                    Err(e) => warn!("Skipping unreadable archive {}: {}", path.display(), e),
                }
            }
        }
        Ok(archives)
    }
}

impl PackageSource for LocalFolderSource {
    fn name(&self) -> String {
        self.dirs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(";")
    }

    fn find_package(&self, id: &str, query: &VersionQuery) -> Result<Option<PackageArchive>> {
        let best = self
            .archives()?
            .into_iter()
            .filter(|archive| archive.manifest().id.eq_ignore_ascii_case(id))
            .filter(|archive| query.accepts(&archive.manifest().version))
            .max_by(|a, b| a.manifest().version.cmp(&b.manifest().version));

        match &best {
            Some(archive) => debug!(
                "Resolved {} to {} from {}",
                id,
                archive.manifest().version,
                archive.path().display()
            ),
            None => debug!("No archive of {} matches {:?}", id, query),
        }
        Ok(best)
    }
}
