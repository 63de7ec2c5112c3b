// src/db/models.rs

//! Data models for Choco database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

/// Stored state for one installed archive package version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInformation {
    pub id: Option<i64>,
    pub package_id: String,
    pub version: String,
    pub is_pinned: bool,
    pub is_side_by_side: bool,
    /// JSON list of native registry keys the install created
    pub registry_snapshot: Option<String>,
    pub installed_at: Option<String>,
}

const PACKAGE_INFORMATION_COLUMNS: &str =
    "id, package_id, version, is_pinned, is_side_by_side, registry_snapshot, installed_at";

impl PackageInformation {
    pub fn new(package_id: String, version: String) -> Self {
        Self {
            id: None,
            package_id,
            version,
            is_pinned: false,
            is_side_by_side: false,
            registry_snapshot: None,
            installed_at: None,
        }
    }

    /// Insert this record, replacing any existing row for the same id and version
    pub fn save(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO package_information (package_id, version, is_pinned, is_side_by_side, registry_snapshot)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(package_id, version) DO UPDATE SET
                is_pinned = excluded.is_pinned,
                is_side_by_side = excluded.is_side_by_side,
                registry_snapshot = excluded.registry_snapshot",
            params![
                &self.package_id,
                &self.version,
                self.is_pinned,
                self.is_side_by_side,
                &self.registry_snapshot,
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM package_information WHERE package_id = ?1 AND version = ?2",
            params![&self.package_id, &self.version],
            |row| row.get(0),
        )?;
        self.id = Some(id);
        Ok(id)
    }

    /// Find the record for an exact package id and version
    pub fn find(conn: &Connection, package_id: &str, version: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKAGE_INFORMATION_COLUMNS} FROM package_information
             WHERE package_id = ?1 AND version = ?2"
        ))?;

        let info = stmt
            .query_row(params![package_id, version], Self::from_row)
            .optional()?;

        Ok(info)
    }

    /// Find every recorded version of a package
    pub fn find_by_package(conn: &Connection, package_id: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKAGE_INFORMATION_COLUMNS} FROM package_information
             WHERE package_id = ?1 ORDER BY version"
        ))?;

        let infos = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(infos)
    }

    /// List all records
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKAGE_INFORMATION_COLUMNS} FROM package_information
             ORDER BY package_id, version"
        ))?;

        let infos = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(infos)
    }

    /// Persist a new pin state
    pub fn set_pinned(&mut self, conn: &Connection, pinned: bool) -> Result<()> {
        self.is_pinned = pinned;
        self.save(conn)?;
        Ok(())
    }

    /// Delete the record for a package version; files are cascade-deleted
    pub fn delete(conn: &Connection, package_id: &str, version: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM package_information WHERE package_id = ?1 AND version = ?2",
            params![package_id, version],
        )?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            version: row.get(2)?,
            is_pinned: row.get(3)?,
            is_side_by_side: row.get(4)?,
            registry_snapshot: row.get(5)?,
            installed_at: row.get(6)?,
        })
    }
}

/// A tracked file belonging to an installed package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFileEntry {
    pub id: Option<i64>,
    pub package_information_id: i64,
    /// Path as stored: relative to the packages root, or absolute if recorded that way
    pub path: String,
    pub checksum: String,
}

impl PackageFileEntry {
    pub fn new(package_information_id: i64, path: String, checksum: String) -> Self {
        Self {
            id: None,
            package_information_id,
            path,
            checksum,
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO package_files (package_information_id, path, checksum) VALUES (?1, ?2, ?3)",
            params![self.package_information_id, &self.path, &self.checksum],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find all files recorded for a package version
    pub fn find_by_package(conn: &Connection, package_information_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_information_id, path, checksum
             FROM package_files WHERE package_information_id = ?1 ORDER BY path",
        )?;

        let files = stmt
            .query_map([package_information_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    /// Drop every file record of a package version
    pub fn delete_by_package(conn: &Connection, package_information_id: i64) -> Result<()> {
        conn.execute(
            "DELETE FROM package_files WHERE package_information_id = ?1",
            [package_information_id],
        )?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            package_information_id: row.get(1)?,
            path: row.get(2)?,
            checksum: row.get(3)?,
        })
    }
}
