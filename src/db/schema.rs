// src/db/schema.rs

//! Database schema definitions and migrations for Choco
//!
//! This module defines the SQLite schema for all core tables and provides
//! a migration system to evolve the schema over time.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!(
        "Schema migration complete. Now at version {}",
        SCHEMA_VERSION
    );
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::Fatal(format!("Unknown migration version: {}", version))),
    }
}

/// Initial schema - Version 1
///
/// - package_information: per archive package state (pin, side-by-side, registry snapshot)
/// - package_files: installed files with checksums, paths relative to the packages root
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE package_information (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id TEXT NOT NULL COLLATE NOCASE,
            version TEXT NOT NULL,
            is_pinned INTEGER NOT NULL DEFAULT 0,
            is_side_by_side INTEGER NOT NULL DEFAULT 0,
            registry_snapshot TEXT,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(package_id, version)
        );

        CREATE INDEX idx_package_information_package_id ON package_information(package_id);

        CREATE TABLE package_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_information_id INTEGER NOT NULL,
            path TEXT NOT NULL,
            checksum TEXT NOT NULL,
            FOREIGN KEY (package_information_id) REFERENCES package_information(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_package_files_package ON package_files(package_information_id);
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}

/// Schema Version 2: native software registry
///
/// Keys are identified by hive and path; values are typed string/dword pairs.
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        CREATE TABLE registry_keys (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hive TEXT NOT NULL,
            key_path TEXT NOT NULL COLLATE NOCASE,
            UNIQUE(hive, key_path)
        );

        CREATE TABLE registry_values (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key_id INTEGER NOT NULL,
            name TEXT NOT NULL COLLATE NOCASE,
            kind TEXT NOT NULL CHECK(kind IN ('string', 'dword')),
            value TEXT NOT NULL,
            UNIQUE(key_id, name),
            FOREIGN KEY (key_id) REFERENCES registry_keys(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_registry_values_key ON registry_values(key_id);
        ",
    )?;

    info!("Schema version 2 applied successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_package_id_is_case_insensitive() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute(
            "INSERT INTO package_information (package_id, version) VALUES ('Git', '1.0.0')",
            [],
        )
        .unwrap();
        let duplicate = conn.execute(
            "INSERT INTO package_information (package_id, version) VALUES ('git', '1.0.0')",
            [],
        );
        assert!(duplicate.is_err());
    }
}
