// src/installed.rs

//! Installed-package registry
//!
//! Answers "what is installed" across both backing stores: archive packages
//! extracted under the packages folder (with their stored information in the
//! package database) and entries of the native software registry.

use crate::context::{InstallContext, PENDING_MARKER};
use crate::db::{self, models::PackageInformation};
use crate::error::Result;
use crate::packages::manifest::MANIFEST_EXTENSION;
use crate::packages::{ArchivePackage, InstalledPackage, PackageManifest, PackageMetadata, RegistryPackage};
use crate::registry::{NativeRegistry, RegistryKey, RegistryStore, SqliteRegistryStore};
use crate::version::PackageVersion;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct PackageRegistry<S: RegistryStore = SqliteRegistryStore> {
    ctx: InstallContext,
    conn: Connection,
    native: NativeRegistry<S>,
}

impl PackageRegistry<SqliteRegistryStore> {
    /// Open both stores configured on the context, creating them when missing
    pub fn open(ctx: &InstallContext) -> Result<Self> {
        let conn = db::open_or_init(&ctx.package_db_path())?;
        let native = NativeRegistry::open(ctx)?;
        Ok(Self::with_parts(ctx.clone(), conn, native))
    }

    /// Open for a dry run: reads whatever exists and writes nothing to disk
    pub fn open_read_only(ctx: &InstallContext) -> Result<Self> {
        let conn = db::open_existing_or_memory(&ctx.package_db_path())?;
        let native = NativeRegistry::open_existing(ctx)?;
        Ok(Self::with_parts(ctx.clone(), conn, native))
    }
}

impl<S: RegistryStore> PackageRegistry<S> {
    pub fn with_parts(ctx: InstallContext, conn: Connection, native: NativeRegistry<S>) -> Self {
        Self { ctx, conn, native }
    }

    pub fn context(&self) -> &InstallContext {
        &self.ctx
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn native(&self) -> &NativeRegistry<S> {
        &self.native
    }

    /// Archive packages whose folder holds a manifest and no pending marker
    pub fn archive_packages(&self) -> Result<Vec<ArchivePackage>> {
        let mut packages = Vec::new();
        for folder in self.package_folders()? {
            if folder.join(PENDING_MARKER).exists() {
                debug!("Skipping pending package folder {}", folder.display());
                continue;
            }
            let Some(manifest_path) = find_manifest(&folder)? else {
                continue;
            };
            let manifest = match PackageManifest::from_file(&manifest_path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("Ignoring unreadable manifest {}: {}", manifest_path.display(), e);
                    continue;
                }
            };
            let information =
                PackageInformation::find(&self.conn, &manifest.id, &manifest.version.to_string())?;
            packages.push(ArchivePackage {
                manifest,
                install_location: folder,
                information,
            });
        }
        Ok(packages)
    }

    /// Package folders left behind by an interrupted install
    pub fn pending_packages(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .package_folders()?
            .into_iter()
            .filter(|folder| folder.join(PENDING_MARKER).exists())
            .collect())
    }

    /// Visible native entries that no archive package recorded as its own
    pub fn registry_packages(&self) -> Result<Vec<RegistryPackage>> {
        let owned = self.recorded_registry_keys()?;
        Ok(self
            .native
            .visible_keys()?
            .into_iter()
            .filter(|key| !owned.contains(key))
            .map(RegistryPackage::from_key)
            .collect())
    }

    /// Every installed package, sorted by id then version
    pub fn list(&self) -> Result<Vec<InstalledPackage>> {
        let mut all: Vec<InstalledPackage> = self
            .archive_packages()?
            .into_iter()
            .map(InstalledPackage::Archive)
            .chain(
                self.registry_packages()?
                    .into_iter()
                    .map(InstalledPackage::Registry),
            )
            .collect();
        all.sort_by(|a, b| {
            a.id()
                .to_ascii_lowercase()
                .cmp(&b.id().to_ascii_lowercase())
                .then_with(|| a.version().cmp(b.version()))
        });
        Ok(all)
    }

    /// Installed packages with the given id, optionally at one version
    pub fn find(&self, id: &str, version: Option<&PackageVersion>) -> Result<Vec<InstalledPackage>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|package| package.id().eq_ignore_ascii_case(id))
            .filter(|package| version.is_none_or(|v| package.version() == v))
            .collect())
    }

    /// Archive packages with the given id, newest first
    pub fn find_archive(&self, id: &str) -> Result<Vec<ArchivePackage>> {
        let mut found: Vec<ArchivePackage> = self
            .archive_packages()?
            .into_iter()
            .filter(|package| package.id().eq_ignore_ascii_case(id))
            .collect();
        found.sort_by(|a, b| b.version().cmp(a.version()));
        Ok(found)
    }

    /// Native entries recorded by archive package installs
    pub fn recorded_registry_keys(&self) -> Result<Vec<RegistryKey>> {
        let mut keys = Vec::new();
        for info in PackageInformation::list_all(&self.conn)? {
            keys.extend(decode_snapshot(&info)?);
        }
        Ok(keys)
    }

    fn package_folders(&self) -> Result<Vec<PathBuf>> {
        let packages_dir = self.ctx.packages_dir();
        if !packages_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut folders = Vec::new();
        for entry in fs::read_dir(&packages_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                folders.push(entry.path());
            }
        }
        folders.sort();
        Ok(folders)
    }
}

/// Native entries stored on a package's information record
pub fn decode_snapshot(info: &PackageInformation) -> Result<Vec<RegistryKey>> {
    match info.registry_snapshot.as_deref() {
        Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(raw)?),
        _ => Ok(Vec::new()),
    }
}

fn find_manifest(folder: &Path) -> Result<Option<PathBuf>> {
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(MANIFEST_EXTENSION))
        {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::SourceKind;
    use crate::registry::{RegistryHive, UNINSTALL_ROOT};

    fn setup() -> (tempfile::TempDir, PackageRegistry) {
        let temp = tempfile::tempdir().unwrap();
        let ctx = InstallContext::new(temp.path());
        ctx.ensure_base_dirs().unwrap();
        let registry = PackageRegistry::open(&ctx).unwrap();
        (temp, registry)
    }

    fn install_folder(registry: &PackageRegistry, folder: &str, id: &str, version: &str) -> PathBuf {
        let dir = registry.context().packages_dir().join(folder);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("{id}.nuspec")),
            format!("<package><metadata><id>{id}</id><version>{version}</version></metadata></package>"),
        )
        .unwrap();
        dir
    }

    fn native_key(name: &str) -> RegistryKey {
        let mut key = RegistryKey::new(RegistryHive::LocalMachine, format!("{UNINSTALL_ROOT}\\{name}"));
        key.display_name = Some(name.to_string());
        key.display_version = Some("3.1".to_string());
        key.uninstall_string = Some("uninstall.exe".to_string());
        key
    }

    #[test]
    fn test_list_merges_both_stores_sorted() {
        let (_temp, registry) = setup();
        install_folder(&registry, "zlib", "zlib", "1.3.0");
        install_folder(&registry, "curl", "curl", "8.0.0");
        registry.native().write_key(&native_key("Notepad")).unwrap();

        let listed = registry.list().unwrap();
        let ids: Vec<_> = listed.iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["curl", "Notepad", "zlib"]);
        assert_eq!(listed[1].source_kind(), SourceKind::NativeRegistry);
        assert_eq!(listed[1].version().to_string(), "3.1.0");
    }

    #[test]
    fn test_pending_folders_are_excluded() {
        let (_temp, registry) = setup();
        let dir = install_folder(&registry, "half", "half", "1.0.0");
        fs::write(dir.join(PENDING_MARKER), "").unwrap();

        assert!(registry.archive_packages().unwrap().is_empty());
        assert_eq!(registry.pending_packages().unwrap(), vec![dir]);
    }

    #[test]
    fn test_find_by_id_and_version() {
        let (_temp, registry) = setup();
        install_folder(&registry, "git", "git", "2.40.0");
        install_folder(&registry, "git.2.41.0", "git", "2.41.0");

        assert_eq!(registry.find("GIT", None).unwrap().len(), 2);
        let exact = PackageVersion::parse("2.41.0").unwrap();
        assert_eq!(registry.find("git", Some(&exact)).unwrap().len(), 1);
        assert_eq!(registry.find_archive("git").unwrap()[0].version(), &exact);
    }

    #[test]
    fn test_recorded_native_keys_are_not_listed_twice() {
        let (_temp, registry) = setup();
        install_folder(&registry, "git", "git", "2.40.0");
        let key = native_key("Git_is1");
        registry.native().write_key(&key).unwrap();

        let mut info = PackageInformation::new("git".to_string(), "2.40.0".to_string());
        info.registry_snapshot = Some(serde_json::to_string(&vec![key]).unwrap());
        info.save(registry.connection()).unwrap();

        let ids: Vec<_> = registry
            .list()
            .unwrap()
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(ids, vec!["git"]);
    }
}
