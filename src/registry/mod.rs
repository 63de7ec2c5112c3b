// src/registry/mod.rs

//! Native software registry
//!
//! Reads and writes installed-software entries under the well-known
//! uninstall-entries root of every hive. Only keys passing the
//! user-visibility rules are reported as packages.

pub mod key;
pub mod store;

pub use key::{PERSISTED_FIELDS, RegistryField, RegistryHive, RegistryKey, RegistryValue};
pub use store::{RegistryStore, SqliteRegistryStore};

use crate::context::InstallContext;
use crate::error::Result;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Key holding one subkey per installed application
pub const UNINSTALL_ROOT: &str = r"Software\Microsoft\Windows\CurrentVersion\Uninstall";

static REGISTRY_GATE: Mutex<()> = Mutex::new(());

/// Serialize access to the shared native registry across threads
pub fn registry_gate() -> MutexGuard<'static, ()> {
    // A panicked holder leaves nothing half-written worth protecting
    REGISTRY_GATE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct NativeRegistry<S: RegistryStore = SqliteRegistryStore> {
    store: S,
}

impl NativeRegistry<SqliteRegistryStore> {
    /// Open the registry store configured on the context
    pub fn open(ctx: &InstallContext) -> Result<Self> {
        Ok(Self::with_store(SqliteRegistryStore::open(
            &ctx.native_registry_path(),
        )?))
    }

    /// Open without creating the store file when it is missing
    pub fn open_existing(ctx: &InstallContext) -> Result<Self> {
        Ok(Self::with_store(SqliteRegistryStore::open_existing(
            &ctx.native_registry_path(),
        )?))
    }
}

impl<S: RegistryStore> NativeRegistry<S> {
    pub fn with_store(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Every entry under the uninstall root of every hive
    pub fn installer_keys(&self) -> Result<Vec<RegistryKey>> {
        let mut keys = Vec::new();
        for hive in RegistryHive::ALL {
            for path in self.store.subkeys(hive, UNINSTALL_ROOT)? {
                if let Some(values) = self.store.read_values(hive, &path)? {
                    keys.push(RegistryKey::from_values(hive, &path, &values));
                }
            }
        }
        Ok(keys)
    }

    /// Entries the host would show as installed software
    pub fn visible_keys(&self) -> Result<Vec<RegistryKey>> {
        Ok(self
            .installer_keys()?
            .into_iter()
            .filter(RegistryKey::is_user_visible)
            .collect())
    }

    pub fn find_by_package_id(&self, package_id: &str) -> Result<Vec<RegistryKey>> {
        Ok(self
            .visible_keys()?
            .into_iter()
            .filter(|key| key.package_id().eq_ignore_ascii_case(package_id))
            .collect())
    }

    /// Persist the allowlisted, non-empty fields of `key`.
    ///
    /// Entries written without an install date are stamped with today's date.
    pub fn write_key(&self, key: &RegistryKey) -> Result<()> {
        let mut values = key.persisted_values();
        if key.install_date.is_none() {
            let today = Local::now().format("%Y%m%d").to_string();
            values.push((RegistryField::InstallDate, RegistryValue::String(today)));
        }
        let named: Vec<(&str, RegistryValue)> = values
            .into_iter()
            .map(|(field, value)| (field.value_name(), value))
            .collect();
        self.store.write_values(key.hive, &key.key_path, &named)?;
        debug!("Registered {} ({} values)", key.key_path, named.len());
        Ok(())
    }

    /// Remove an entry; a key that does not exist is left alone
    pub fn delete_key(&self, hive: RegistryHive, key_path: &str) -> Result<bool> {
        let removed = self.store.delete_key(hive, key_path)?;
        if removed {
            info!("Removed registry key {}\\{}", hive, key_path);
        } else {
            debug!("Registry key {}\\{} not present", hive, key_path);
        }
        Ok(removed)
    }

    /// Flip the pin flag of an entry through the allowlisted write path
    pub fn set_pinned(&self, key: &RegistryKey, pinned: bool) -> Result<RegistryKey> {
        let mut updated = key.clone();
        updated.is_pinned = pinned;
        self.write_key(&updated)?;
        Ok(updated)
    }

    pub fn snapshot(&self) -> Result<RegistrySnapshot> {
        Ok(RegistrySnapshot {
            keys: self.visible_keys()?,
        })
    }

    /// Whether an entry with the same identity is still registered
    pub fn contains(&self, key: &RegistryKey) -> Result<bool> {
        Ok(self.visible_keys()?.iter().any(|existing| existing == key))
    }
}

/// Visible entries at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub keys: Vec<RegistryKey>,
}

impl RegistrySnapshot {
    /// Entries present here but not in `before`
    pub fn added_since(&self, before: &RegistrySnapshot) -> Vec<RegistryKey> {
        self.keys
            .iter()
            .filter(|key| !before.keys.contains(key))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visible(name: &str) -> RegistryKey {
        let mut key = RegistryKey::new(
            RegistryHive::LocalMachine,
            format!("{}\\{}", UNINSTALL_ROOT, name),
        );
        key.display_name = Some(name.to_string());
        key.display_version = Some("1.0".to_string());
        key.uninstall_string = Some(format!("uninstall-{}", name));
        key
    }

    fn registry() -> NativeRegistry<SqliteRegistryStore> {
        NativeRegistry::with_store(SqliteRegistryStore::in_memory().unwrap())
    }

    #[test]
    fn test_write_then_find() {
        let registry = registry();
        let mut key = visible("WinMerge");
        key.package_id = Some("winmerge".to_string());
        key.install_date = Some("20240501".to_string());
        registry.write_key(&key).unwrap();

        let found = registry.find_by_package_id("WINMERGE").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0], key);
        assert_eq!(found[0].install_date.as_deref(), Some("20240501"));
    }

    #[test]
    fn test_install_date_stamped_when_missing() {
        let registry = registry();
        registry.write_key(&visible("Fresh")).unwrap();

        let found = registry.find_by_package_id("Fresh").unwrap();
        let date = found[0].install_date.clone().unwrap();
        assert_eq!(date.len(), 8);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_hidden_entries_are_not_visible() {
        let registry = registry();
        registry.write_key(&visible("Shown")).unwrap();

        let mut hidden = visible("Hidden");
        hidden.uninstall_string = None;
        registry.write_key(&hidden).unwrap();

        assert_eq!(registry.installer_keys().unwrap().len(), 2);
        let shown = registry.visible_keys().unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].package_id(), "Shown");
    }

    #[test]
    fn test_non_allowlisted_fields_are_not_written() {
        let registry = registry();
        let mut key = visible("Quiet");
        key.quiet_uninstall_string = Some("quiet".to_string());
        registry.write_key(&key).unwrap();

        let stored = registry.installer_keys().unwrap();
        assert!(stored[0].quiet_uninstall_string.is_none());
    }

    #[test]
    fn test_delete_key_is_idempotent() {
        let registry = registry();
        let key = visible("Temp");
        registry.write_key(&key).unwrap();

        assert!(registry.delete_key(key.hive, &key.key_path).unwrap());
        assert!(!registry.delete_key(key.hive, &key.key_path).unwrap());
        assert!(registry.visible_keys().unwrap().is_empty());
    }

    #[test]
    fn test_set_pinned_round_trip() {
        let registry = registry();
        let key = visible("Pinned");
        registry.write_key(&key).unwrap();

        registry.set_pinned(&key, true).unwrap();
        assert!(registry.find_by_package_id("Pinned").unwrap()[0].is_pinned);

        registry.set_pinned(&key, false).unwrap();
        assert!(!registry.find_by_package_id("Pinned").unwrap()[0].is_pinned);
    }

    #[test]
    fn test_snapshot_difference() {
        let registry = registry();
        registry.write_key(&visible("Existing")).unwrap();
        let before = registry.snapshot().unwrap();

        registry.write_key(&visible("New")).unwrap();
        let after = registry.snapshot().unwrap();

        let added = after.added_since(&before);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].package_id(), "New");
        assert!(registry.contains(&added[0]).unwrap());
    }

    #[test]
    fn test_gate_serializes_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    let _guard = registry_gate();
                    std::thread::sleep(std::time::Duration::from_millis(5));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        drop(registry_gate());
    }
}
