// src/pin.rs

//! Pin gate
//!
//! A pin is a flag stored on whichever backing store owns the package: the
//! package information record for archive packages, or the `IsPinned` value
//! of a native registry entry. Upgrades skip pinned packages unless forced.

use crate::db::models::PackageInformation;
use crate::error::{Error, Result};
use crate::installed::PackageRegistry;
use crate::packages::{InstalledPackage, PackageMetadata, SourceKind};
use crate::registry::RegistryStore;
use crate::version::PackageVersion;
use tracing::info;

/// Outcome of a pin request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinChange {
    Changed,
    NoChange,
}

/// Pin or unpin every matching installed version of `name`
pub fn set_pin<S: RegistryStore>(
    registry: &PackageRegistry<S>,
    name: &str,
    version: Option<&PackageVersion>,
    pinned: bool,
    source: SourceKind,
) -> Result<PinChange> {
    if name.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "a package name is required to add or remove a pin".to_string(),
        ));
    }

    let targets: Vec<InstalledPackage> = registry
        .find(name, version)?
        .into_iter()
        .filter(|package| package.source_kind() == source)
        .collect();
    if targets.is_empty() {
        let wanted = match version {
            Some(version) => format!("{} {}", name, version),
            None => name.to_string(),
        };
        return Err(Error::PackageNotFound(wanted));
    }

    let mut change = PinChange::NoChange;
    for package in targets {
        if package.is_pinned() == pinned {
            continue;
        }
        match &package {
            InstalledPackage::Archive(archive) => {
                let mut information = archive.information.clone().unwrap_or_else(|| {
                    PackageInformation::new(archive.id().to_string(), archive.version().to_string())
                });
                information.set_pinned(registry.connection(), pinned)?;
            }
            InstalledPackage::Registry(native) => {
                registry.native().set_pinned(native.registry_key(), pinned)?;
            }
        }
        info!(
            "{} {} {}",
            if pinned { "Pinned" } else { "Unpinned" },
            package.id(),
            package.version()
        );
        change = PinChange::Changed;
    }
    Ok(change)
}

/// Installed packages whose pin state equals `show_pinned`
pub fn list_pins<S: RegistryStore>(
    registry: &PackageRegistry<S>,
    show_pinned: bool,
) -> Result<Vec<InstalledPackage>> {
    Ok(registry
        .list()?
        .into_iter()
        .filter(|package| package.is_pinned() == show_pinned)
        .collect())
}

/// Whether an upgrade may replace `package`
pub fn upgrade_allowed(package: &impl PackageMetadata, force: bool) -> bool {
    force || !package.is_pinned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InstallContext;
    use crate::registry::{RegistryHive, RegistryKey, UNINSTALL_ROOT};
    use std::fs;

    fn setup() -> (tempfile::TempDir, PackageRegistry) {
        let temp = tempfile::tempdir().unwrap();
        let ctx = InstallContext::new(temp.path());
        ctx.ensure_base_dirs().unwrap();
        let dir = ctx.packages_dir().join("git");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("git.nuspec"),
            "<package><metadata><id>git</id><version>2.40.0</version></metadata></package>",
        )
        .unwrap();
        let registry = PackageRegistry::open(&ctx).unwrap();
        (temp, registry)
    }

    #[test]
    fn test_pin_is_idempotent() {
        let (_temp, registry) = setup();

        let first = set_pin(&registry, "git", None, true, SourceKind::Archive).unwrap();
        assert_eq!(first, PinChange::Changed);
        let second = set_pin(&registry, "git", None, true, SourceKind::Archive).unwrap();
        assert_eq!(second, PinChange::NoChange);

        let pinned = list_pins(&registry, true).unwrap();
        assert_eq!(pinned.len(), 1);
        assert!(pinned[0].is_pinned());

        assert_eq!(
            set_pin(&registry, "git", None, false, SourceKind::Archive).unwrap(),
            PinChange::Changed
        );
        assert!(list_pins(&registry, true).unwrap().is_empty());
        assert_eq!(list_pins(&registry, false).unwrap().len(), 1);
    }

    #[test]
    fn test_pin_requires_name() {
        let (_temp, registry) = setup();
        assert!(matches!(
            set_pin(&registry, "  ", None, true, SourceKind::Archive),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_pin_unknown_package() {
        let (_temp, registry) = setup();
        assert!(matches!(
            set_pin(&registry, "missing", None, true, SourceKind::Archive),
            Err(Error::PackageNotFound(_))
        ));
    }

    #[test]
    fn test_pin_native_entry() {
        let (_temp, registry) = setup();
        let mut key = RegistryKey::new(RegistryHive::CurrentUser, format!("{UNINSTALL_ROOT}\\Paint"));
        key.display_name = Some("Paint".to_string());
        key.uninstall_string = Some("paint-uninstall".to_string());
        registry.native().write_key(&key).unwrap();

        // The archive store has no such package
        assert!(set_pin(&registry, "Paint", None, true, SourceKind::Archive).is_err());

        assert_eq!(
            set_pin(&registry, "Paint", None, true, SourceKind::NativeRegistry).unwrap(),
            PinChange::Changed
        );
        assert_eq!(
            set_pin(&registry, "paint", None, true, SourceKind::NativeRegistry).unwrap(),
            PinChange::NoChange
        );
        assert!(registry.native().find_by_package_id("Paint").unwrap()[0].is_pinned);
    }

    #[test]
    fn test_upgrade_gate() {
        let (_temp, registry) = setup();
        set_pin(&registry, "git", None, true, SourceKind::Archive).unwrap();
        let package = &registry.find("git", None).unwrap()[0];
        assert!(!upgrade_allowed(package, false));
        assert!(upgrade_allowed(package, true));
    }
}
