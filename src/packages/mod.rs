// src/packages/mod.rs

//! Package formats and installed package shapes for Choco
//!
//! Archives (`.nupkg`) carry a manifest and a content tree. Once installed, a
//! package is represented by `InstalledPackage`, which is either an archive
//! package tracked under the packages folder or an entry adapted from the
//! native software registry.

pub mod archive;
pub mod manifest;
pub mod traits;

pub use archive::{ARCHIVE_EXTENSION, PackageArchive};
pub use manifest::{DependencySet, PackageDependency, PackageManifest};
pub use traits::{
    ArchivePackage, InstalledPackage, PackageMetadata, PackageSummary, RegistryPackage, SourceKind,
};

use crate::context::InstallContext;
use std::path::{Path, PathBuf};

/// A file installed by an archive package and its checksum
///
/// Paths under the packages folder are stored relative to it so the tree can
/// be relocated; any other path is stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    stored_path: String,
    pub checksum: String,
}

impl PackageFile {
    pub fn new(ctx: &InstallContext, path: &Path, checksum: impl Into<String>) -> Self {
        let mut file = Self {
            stored_path: String::new(),
            checksum: checksum.into(),
        };
        file.set_path(ctx, path);
        file
    }

    pub fn set_path(&mut self, ctx: &InstallContext, path: &Path) {
        self.stored_path = match path.strip_prefix(ctx.packages_dir()) {
            Ok(relative) if !relative.as_os_str().is_empty() => {
                relative.to_string_lossy().into_owned()
            }
            _ => path.to_string_lossy().into_owned(),
        };
    }

    /// Absolute location under the current packages folder
    pub fn path(&self, ctx: &InstallContext) -> PathBuf {
        let stored = Path::new(&self.stored_path);
        if stored.is_absolute() {
            stored.to_path_buf()
        } else {
            ctx.packages_dir().join(stored)
        }
    }

    pub fn stored_path(&self) -> &str {
        &self.stored_path
    }
}
