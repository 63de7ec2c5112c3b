// src/registry/store.rs

//! Backing stores for the native software registry

use crate::db;
use crate::error::{Error, Result};
use crate::registry::key::{RegistryHive, RegistryValue};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Hierarchical key/value store holding installed-software entries
pub trait RegistryStore {
    /// Full paths of the direct children of `parent`
    fn subkeys(&self, hive: RegistryHive, parent: &str) -> Result<Vec<String>>;

    /// All values of a key, or `None` when the key does not exist
    fn read_values(
        &self,
        hive: RegistryHive,
        key_path: &str,
    ) -> Result<Option<BTreeMap<String, RegistryValue>>>;

    /// Create the key if needed and set the given values
    fn write_values(
        &self,
        hive: RegistryHive,
        key_path: &str,
        values: &[(&str, RegistryValue)],
    ) -> Result<()>;

    /// Delete a key and its children; returns whether anything was removed
    fn delete_key(&self, hive: RegistryHive, key_path: &str) -> Result<bool>;
}

/// Registry store kept in a SQLite file
pub struct SqliteRegistryStore {
    conn: Connection,
}

impl SqliteRegistryStore {
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening native registry store at {}", path.display());
        Ok(Self {
            conn: db::open_or_init(path)?,
        })
    }

    /// Store that lives only as long as the value, for tests and dry runs
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: db::open_in_memory()?,
        })
    }

    /// Existing store at `path`, or an empty one when there is none yet
    pub fn open_existing(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: db::open_existing_or_memory(path)?,
        })
    }

    fn key_id(&self, hive: RegistryHive, key_path: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM registry_keys WHERE hive = ?1 AND key_path = ?2",
                params![hive.as_str(), key_path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

fn normalize_key_path(key_path: &str) -> String {
    key_path.trim_matches('\\').to_string()
}

/// LIKE pattern matching every key below `key_path`, escaped with `!`
fn descendant_pattern(key_path: &str) -> String {
    let mut pattern = String::with_capacity(key_path.len() + 2);
    for c in key_path.chars() {
        if matches!(c, '!' | '%' | '_') {
            pattern.push('!');
        }
        pattern.push(c);
    }
    pattern.push_str("\\%");
    pattern
}

impl RegistryStore for SqliteRegistryStore {
    fn subkeys(&self, hive: RegistryHive, parent: &str) -> Result<Vec<String>> {
        let parent = normalize_key_path(parent);
        let prefix = format!("{}\\", parent.to_ascii_lowercase());

        let mut stmt = self
            .conn
            .prepare("SELECT key_path FROM registry_keys WHERE hive = ?1 ORDER BY key_path")?;
        let paths = stmt
            .query_map([hive.as_str()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut children: Vec<String> = Vec::new();
        for path in paths {
            if !path.to_ascii_lowercase().starts_with(&prefix) {
                continue;
            }
            // Keep only the first segment below the parent; deeper keys imply it
            let rest = &path[prefix.len()..];
            let child_name = rest.split('\\').next().unwrap_or(rest);
            let child = format!("{}\\{}", parent, child_name);
            if !children.iter().any(|c| c.eq_ignore_ascii_case(&child)) {
                children.push(child);
            }
        }
        Ok(children)
    }

    fn read_values(
        &self,
        hive: RegistryHive,
        key_path: &str,
    ) -> Result<Option<BTreeMap<String, RegistryValue>>> {
        let Some(key_id) = self.key_id(hive, &normalize_key_path(key_path))? else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT name, kind, value FROM registry_values WHERE key_id = ?1")?;
        let rows = stmt
            .query_map([key_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut values = BTreeMap::new();
        for (name, kind, raw) in rows {
            let value = match kind.as_str() {
                "dword" => RegistryValue::DWord(raw.parse().map_err(|_| {
                    Error::Config(format!("corrupt dword value {} in {}", name, key_path))
                })?),
                _ => RegistryValue::String(raw),
            };
            values.insert(name, value);
        }
        Ok(Some(values))
    }

    fn write_values(
        &self,
        hive: RegistryHive,
        key_path: &str,
        values: &[(&str, RegistryValue)],
    ) -> Result<()> {
        let key_path = normalize_key_path(key_path);
        self.conn.execute(
            "INSERT OR IGNORE INTO registry_keys (hive, key_path) VALUES (?1, ?2)",
            params![hive.as_str(), &key_path],
        )?;
        let key_id = self
            .key_id(hive, &key_path)?
            .ok_or_else(|| Error::Fatal(format!("registry key vanished: {}", key_path)))?;

        for (name, value) in values {
            let (kind, raw) = match value {
                RegistryValue::String(s) => ("string", s.clone()),
                RegistryValue::DWord(n) => ("dword", n.to_string()),
            };
            self.conn.execute(
                "INSERT INTO registry_values (key_id, name, kind, value) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key_id, name) DO UPDATE SET kind = excluded.kind, value = excluded.value",
                params![key_id, name, kind, raw],
            )?;
        }
        debug!("Wrote {} values to {}\\{}", values.len(), hive, key_path);
        Ok(())
    }

    fn delete_key(&self, hive: RegistryHive, key_path: &str) -> Result<bool> {
        let key_path = normalize_key_path(key_path);
        let removed = self.conn.execute(
            "DELETE FROM registry_keys
             WHERE hive = ?1 AND (key_path = ?2 OR key_path LIKE ?3 ESCAPE '!')",
            params![hive.as_str(), &key_path, descendant_pattern(&key_path)],
        )?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_values() {
        let store = SqliteRegistryStore::in_memory().unwrap();
        store
            .write_values(
                RegistryHive::LocalMachine,
                r"Software\Uninstall\Git",
                &[
                    ("DisplayName", RegistryValue::String("Git".to_string())),
                    ("EstimatedSize", RegistryValue::DWord(1024)),
                ],
            )
            .unwrap();

        let values = store
            .read_values(RegistryHive::LocalMachine, r"software\uninstall\git")
            .unwrap()
            .unwrap();
        assert_eq!(values["DisplayName"], RegistryValue::String("Git".to_string()));
        assert_eq!(values["EstimatedSize"], RegistryValue::DWord(1024));

        // Other hives are separate
        assert!(
            store
                .read_values(RegistryHive::CurrentUser, r"Software\Uninstall\Git")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_overwrite_value() {
        let store = SqliteRegistryStore::in_memory().unwrap();
        let path = r"Software\Uninstall\Tool";
        store
            .write_values(RegistryHive::CurrentUser, path, &[("IsPinned", RegistryValue::DWord(1))])
            .unwrap();
        store
            .write_values(RegistryHive::CurrentUser, path, &[("IsPinned", RegistryValue::DWord(0))])
            .unwrap();
        let values = store.read_values(RegistryHive::CurrentUser, path).unwrap().unwrap();
        assert_eq!(values["IsPinned"], RegistryValue::DWord(0));
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_subkeys_lists_direct_children() {
        let store = SqliteRegistryStore::in_memory().unwrap();
        for path in [
            r"Root\Uninstall\A",
            r"Root\Uninstall\B",
            r"Root\Uninstall\B\Nested",
            r"Root\Other\C",
        ] {
            store.write_values(RegistryHive::LocalMachine, path, &[]).unwrap();
        }

        let children = store.subkeys(RegistryHive::LocalMachine, r"Root\Uninstall").unwrap();
        assert_eq!(children, vec![r"Root\Uninstall\A", r"Root\Uninstall\B"]);
    }

    #[test]
    fn test_delete_missing_key_is_noop() {
        let store = SqliteRegistryStore::in_memory().unwrap();
        assert!(!store.delete_key(RegistryHive::LocalMachine, r"Nope\Missing").unwrap());

        store
            .write_values(RegistryHive::LocalMachine, r"Root\X\Child", &[])
            .unwrap();
        store.write_values(RegistryHive::LocalMachine, r"Root\X", &[]).unwrap();
        assert!(store.delete_key(RegistryHive::LocalMachine, r"Root\X").unwrap());
        assert!(store.subkeys(RegistryHive::LocalMachine, "Root").unwrap().is_empty());
    }

    #[test]
    fn test_delete_key_treats_wildcards_literally() {
        let store = SqliteRegistryStore::in_memory().unwrap();
        for path in [
            r"Root\Git_is1",
            r"Root\Git_is1\Child",
            r"Root\GitXis1\Child",
            r"Root\100%\Child",
            r"Root\100X\Child",
            r"Root\Bang!\Child",
        ] {
            store.write_values(RegistryHive::LocalMachine, path, &[]).unwrap();
        }

        store.delete_key(RegistryHive::LocalMachine, r"Root\Git_is1").unwrap();
        store.delete_key(RegistryHive::LocalMachine, r"Root\100%").unwrap();
        store.delete_key(RegistryHive::LocalMachine, r"Root\Bang!").unwrap();

        let survivors = |parent: &str| store.subkeys(RegistryHive::LocalMachine, parent).unwrap();
        assert_eq!(survivors("Root"), vec![r"Root\100X", r"Root\GitXis1"]);
        assert_eq!(survivors(r"Root\GitXis1"), vec![r"Root\GitXis1\Child"]);
        assert!(survivors(r"Root\Git_is1").is_empty());
    }
}
