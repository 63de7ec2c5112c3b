// src/packages/traits.rs

//! Common surface over installed packages from either backing store

use crate::db::models::PackageInformation;
use crate::packages::manifest::{DependencySet, PackageManifest};
use crate::registry::RegistryKey;
use crate::version::PackageVersion;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Which backing store owns a package's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Archive,
    NativeRegistry,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Archive => write!(f, "archive"),
            SourceKind::NativeRegistry => write!(f, "native"),
        }
    }
}

/// Capabilities every installed package provides
pub trait PackageMetadata {
    fn id(&self) -> &str;

    fn version(&self) -> &PackageVersion;

    fn title(&self) -> Option<&str>;

    fn is_pinned(&self) -> bool;

    fn install_location(&self) -> Option<&Path>;

    fn source_kind(&self) -> SourceKind;
}

/// Package extracted from an archive into the packages folder
#[derive(Debug, Clone)]
pub struct ArchivePackage {
    pub manifest: PackageManifest,
    pub install_location: PathBuf,
    /// Stored state; absent for folders installed before the store existed
    pub information: Option<PackageInformation>,
}

impl ArchivePackage {
    pub fn dependency_sets(&self) -> &[DependencySet] {
        &self.manifest.dependency_sets
    }

    pub fn tags(&self) -> &[String] {
        &self.manifest.tags
    }

    pub fn is_side_by_side(&self) -> bool {
        self.information
            .as_ref()
            .is_some_and(|info| info.is_side_by_side)
    }
}

impl PackageMetadata for ArchivePackage {
    fn id(&self) -> &str {
        &self.manifest.id
    }

    fn version(&self) -> &PackageVersion {
        &self.manifest.version
    }

    fn title(&self) -> Option<&str> {
        self.manifest.title.as_deref()
    }

    fn is_pinned(&self) -> bool {
        self.information.as_ref().is_some_and(|info| info.is_pinned)
    }

    fn install_location(&self) -> Option<&Path> {
        Some(&self.install_location)
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Archive
    }
}

/// Software known only through its native registry entry
#[derive(Debug, Clone)]
pub struct RegistryPackage {
    version: PackageVersion,
    install_location: Option<PathBuf>,
    key: RegistryKey,
}

impl RegistryPackage {
    pub fn from_key(key: RegistryKey) -> Self {
        let version = match (&key.display_version, key.version_major) {
            (Some(display), _) => PackageVersion::parse_lenient(display),
            (None, Some(major)) => PackageVersion::new(
                u64::from(major),
                u64::from(key.version_minor.unwrap_or(0)),
                0,
            ),
            (None, None) => PackageVersion::new(0, 0, 0),
        };
        let install_location = key
            .install_location
            .as_deref()
            .filter(|location| !location.trim().is_empty())
            .map(PathBuf::from);

        Self {
            version,
            install_location,
            key,
        }
    }

    pub fn registry_key(&self) -> &RegistryKey {
        &self.key
    }
}

impl PackageMetadata for RegistryPackage {
    fn id(&self) -> &str {
        self.key.package_id()
    }

    fn version(&self) -> &PackageVersion {
        &self.version
    }

    fn title(&self) -> Option<&str> {
        self.key.display_name.as_deref()
    }

    fn is_pinned(&self) -> bool {
        self.key.is_pinned
    }

    fn install_location(&self) -> Option<&Path> {
        self.install_location.as_deref()
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::NativeRegistry
    }
}

/// An installed package from either backing store
#[derive(Debug, Clone)]
pub enum InstalledPackage {
    Archive(ArchivePackage),
    Registry(RegistryPackage),
}

impl InstalledPackage {
    fn metadata(&self) -> &dyn PackageMetadata {
        match self {
            InstalledPackage::Archive(package) => package,
            InstalledPackage::Registry(package) => package,
        }
    }

    pub fn as_archive(&self) -> Option<&ArchivePackage> {
        match self {
            InstalledPackage::Archive(package) => Some(package),
            InstalledPackage::Registry(_) => None,
        }
    }

    pub fn as_registry(&self) -> Option<&RegistryPackage> {
        match self {
            InstalledPackage::Registry(package) => Some(package),
            InstalledPackage::Archive(_) => None,
        }
    }

    pub fn summary(&self) -> PackageSummary {
        PackageSummary {
            id: self.id().to_string(),
            version: self.version().clone(),
            title: self.title().map(str::to_string),
            pinned: self.is_pinned(),
            source: self.source_kind(),
            install_location: self.install_location().map(Path::to_path_buf),
        }
    }
}

impl PackageMetadata for InstalledPackage {
    fn id(&self) -> &str {
        self.metadata().id()
    }

    fn version(&self) -> &PackageVersion {
        self.metadata().version()
    }

    fn title(&self) -> Option<&str> {
        self.metadata().title()
    }

    fn is_pinned(&self) -> bool {
        self.metadata().is_pinned()
    }

    fn install_location(&self) -> Option<&Path> {
        self.metadata().install_location()
    }

    fn source_kind(&self) -> SourceKind {
        self.metadata().source_kind()
    }
}

/// Flat listing row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSummary {
    pub id: String,
    pub version: PackageVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub pinned: bool,
    pub source: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_location: Option<PathBuf>,
}
