// src/registry/key.rs

//! Native software registration entries
//!
//! A `RegistryKey` mirrors one entry under the uninstall-entries root. The
//! fields that may be read or written are enumerated by `RegistryField`, and
//! the subset persisted on write is the static `PERSISTED_FIELDS` list.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Top-level registry hive an entry lives under
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum RegistryHive {
    #[default]
    LocalMachine,
    /// 32-bit view of the machine hive on 64-bit hosts
    LocalMachine32,
    CurrentUser,
}

impl RegistryHive {
    pub const ALL: [RegistryHive; 3] = [
        RegistryHive::LocalMachine,
        RegistryHive::LocalMachine32,
        RegistryHive::CurrentUser,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryHive::LocalMachine => "HKLM",
            RegistryHive::LocalMachine32 => "HKLM32",
            RegistryHive::CurrentUser => "HKCU",
        }
    }
}

impl fmt::Display for RegistryHive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RegistryHive {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HKLM" | "HKEY_LOCAL_MACHINE" => Ok(RegistryHive::LocalMachine),
            "HKLM32" => Ok(RegistryHive::LocalMachine32),
            "HKCU" | "HKEY_CURRENT_USER" => Ok(RegistryHive::CurrentUser),
            _ => Err(Error::InvalidArgument(format!("unknown registry hive: {}", s))),
        }
    }
}

/// Typed registry value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryValue {
    String(String),
    DWord(u32),
}

impl RegistryValue {
    pub fn as_string(&self) -> String {
        match self {
            RegistryValue::String(s) => s.clone(),
            RegistryValue::DWord(n) => n.to_string(),
        }
    }

    pub fn as_dword(&self) -> Option<u32> {
        match self {
            RegistryValue::DWord(n) => Some(*n),
            RegistryValue::String(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_flag(&self) -> bool {
        self.as_dword().is_some_and(|n| n != 0)
    }
}

/// Every value name a `RegistryKey` understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryField {
    DisplayName,
    DisplayVersion,
    VersionMajor,
    VersionMinor,
    PackageId,
    InstallLocation,
    UninstallString,
    QuietUninstallString,
    Publisher,
    InstallDate,
    EstimatedSize,
    DisplayIcon,
    SystemComponent,
    NoRemove,
    NoModify,
    NoRepair,
    WindowsInstaller,
    ReleaseType,
    ParentKeyName,
    Tag,
    IsPinned,
}

impl RegistryField {
    pub const ALL: [RegistryField; 21] = [
        RegistryField::DisplayName,
        RegistryField::DisplayVersion,
        RegistryField::VersionMajor,
        RegistryField::VersionMinor,
        RegistryField::PackageId,
        RegistryField::InstallLocation,
        RegistryField::UninstallString,
        RegistryField::QuietUninstallString,
        RegistryField::Publisher,
        RegistryField::InstallDate,
        RegistryField::EstimatedSize,
        RegistryField::DisplayIcon,
        RegistryField::SystemComponent,
        RegistryField::NoRemove,
        RegistryField::NoModify,
        RegistryField::NoRepair,
        RegistryField::WindowsInstaller,
        RegistryField::ReleaseType,
        RegistryField::ParentKeyName,
        RegistryField::Tag,
        RegistryField::IsPinned,
    ];

    /// Value name as stored in the registry
    pub fn value_name(&self) -> &'static str {
        match self {
            RegistryField::DisplayName => "DisplayName",
            RegistryField::DisplayVersion => "DisplayVersion",
            RegistryField::VersionMajor => "VersionMajor",
            RegistryField::VersionMinor => "VersionMinor",
            RegistryField::PackageId => "ChocolateyPackageId",
            RegistryField::InstallLocation => "InstallLocation",
            RegistryField::UninstallString => "UninstallString",
            RegistryField::QuietUninstallString => "QuietUninstallString",
            RegistryField::Publisher => "Publisher",
            RegistryField::InstallDate => "InstallDate",
            RegistryField::EstimatedSize => "EstimatedSize",
            RegistryField::DisplayIcon => "DisplayIcon",
            RegistryField::SystemComponent => "SystemComponent",
            RegistryField::NoRemove => "NoRemove",
            RegistryField::NoModify => "NoModify",
            RegistryField::NoRepair => "NoRepair",
            RegistryField::WindowsInstaller => "WindowsInstaller",
            RegistryField::ReleaseType => "ReleaseType",
            RegistryField::ParentKeyName => "ParentKeyName",
            RegistryField::Tag => "Tag",
            RegistryField::IsPinned => "IsPinned",
        }
    }
}

/// Fields written back to the store; everything else is read-only
pub const PERSISTED_FIELDS: &[RegistryField] = &[
    RegistryField::DisplayName,
    RegistryField::VersionMajor,
    RegistryField::VersionMinor,
    RegistryField::InstallLocation,
    RegistryField::PackageId,
    RegistryField::UninstallString,
    RegistryField::Publisher,
    RegistryField::NoModify,
    RegistryField::NoRepair,
    RegistryField::InstallDate,
    RegistryField::DisplayVersion,
    RegistryField::EstimatedSize,
    RegistryField::Tag,
    RegistryField::DisplayIcon,
    RegistryField::IsPinned,
];

/// One installed-software entry
///
/// Equality and hashing cover `(display_name, display_version,
/// uninstall_string, key_path)` only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryKey {
    pub hive: RegistryHive,
    pub key_path: String,
    pub package_id: Option<String>,
    pub display_name: Option<String>,
    pub display_version: Option<String>,
    pub version_major: Option<u32>,
    pub version_minor: Option<u32>,
    pub install_location: Option<String>,
    pub uninstall_string: Option<String>,
    pub quiet_uninstall_string: Option<String>,
    pub publisher: Option<String>,
    pub install_date: Option<String>,
    pub estimated_size: Option<u32>,
    pub display_icon: Option<String>,
    pub system_component: bool,
    pub no_remove: bool,
    pub no_modify: bool,
    pub no_repair: bool,
    pub windows_installer: bool,
    pub release_type: Option<String>,
    pub parent_key_name: Option<String>,
    pub tag: Option<String>,
    pub is_pinned: bool,
}

impl RegistryKey {
    pub fn new(hive: RegistryHive, key_path: impl Into<String>) -> Self {
        Self {
            hive,
            key_path: key_path.into(),
            ..Default::default()
        }
    }

    /// Last segment of the key path
    pub fn subkey_name(&self) -> &str {
        self.key_path
            .rsplit('\\')
            .next()
            .unwrap_or(self.key_path.as_str())
    }

    /// Package id: the override value when present, otherwise the subkey name
    pub fn package_id(&self) -> &str {
        self.package_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| self.subkey_name())
    }

    /// Whether the entry shows up in the host's installed-software list
    pub fn is_user_visible(&self) -> bool {
        let has_text = |value: &Option<String>| value.as_deref().is_some_and(|s| !s.trim().is_empty());

        let is_update = self.release_type.as_deref().is_some_and(|kind| {
            matches!(
                kind.to_ascii_lowercase().as_str(),
                "hotfix" | "security update" | "update rollup" | "service pack"
            )
        });

        has_text(&self.display_name)
            && has_text(&self.uninstall_string)
            && !is_update
            && !has_text(&self.parent_key_name)
            && !self.system_component
            && !self.no_remove
    }

    pub fn value_of(&self, field: RegistryField) -> Option<RegistryValue> {
        let text = |value: &Option<String>| value.clone().map(RegistryValue::String);
        let number = |value: Option<u32>| value.map(RegistryValue::DWord);
        let flag = |value: bool| value.then_some(RegistryValue::DWord(1));

        match field {
            RegistryField::DisplayName => text(&self.display_name),
            RegistryField::DisplayVersion => text(&self.display_version),
            RegistryField::VersionMajor => number(self.version_major),
            RegistryField::VersionMinor => number(self.version_minor),
            RegistryField::PackageId => text(&self.package_id),
            RegistryField::InstallLocation => text(&self.install_location),
            RegistryField::UninstallString => text(&self.uninstall_string),
            RegistryField::QuietUninstallString => text(&self.quiet_uninstall_string),
            RegistryField::Publisher => text(&self.publisher),
            RegistryField::InstallDate => text(&self.install_date),
            RegistryField::EstimatedSize => number(self.estimated_size),
            RegistryField::DisplayIcon => text(&self.display_icon),
            RegistryField::SystemComponent => flag(self.system_component),
            RegistryField::NoRemove => flag(self.no_remove),
            RegistryField::NoModify => flag(self.no_modify),
            RegistryField::NoRepair => flag(self.no_repair),
            RegistryField::WindowsInstaller => flag(self.windows_installer),
            RegistryField::ReleaseType => text(&self.release_type),
            RegistryField::ParentKeyName => text(&self.parent_key_name),
            RegistryField::Tag => text(&self.tag),
            // Unpinning must overwrite a stored 1, so the flag is always written
            RegistryField::IsPinned => Some(RegistryValue::DWord(u32::from(self.is_pinned))),
        }
    }

    fn apply(&mut self, field: RegistryField, value: &RegistryValue) {
        match field {
            RegistryField::DisplayName => self.display_name = Some(value.as_string()),
            RegistryField::DisplayVersion => self.display_version = Some(value.as_string()),
            RegistryField::VersionMajor => self.version_major = value.as_dword(),
            RegistryField::VersionMinor => self.version_minor = value.as_dword(),
            RegistryField::PackageId => self.package_id = Some(value.as_string()),
            RegistryField::InstallLocation => self.install_location = Some(value.as_string()),
            RegistryField::UninstallString => self.uninstall_string = Some(value.as_string()),
            RegistryField::QuietUninstallString => {
                self.quiet_uninstall_string = Some(value.as_string())
            }
            RegistryField::Publisher => self.publisher = Some(value.as_string()),
            RegistryField::InstallDate => self.install_date = Some(value.as_string()),
            RegistryField::EstimatedSize => self.estimated_size = value.as_dword(),
            RegistryField::DisplayIcon => self.display_icon = Some(value.as_string()),
            RegistryField::SystemComponent => self.system_component = value.as_flag(),
            RegistryField::NoRemove => self.no_remove = value.as_flag(),
            RegistryField::NoModify => self.no_modify = value.as_flag(),
            RegistryField::NoRepair => self.no_repair = value.as_flag(),
            RegistryField::WindowsInstaller => self.windows_installer = value.as_flag(),
            RegistryField::ReleaseType => self.release_type = Some(value.as_string()),
            RegistryField::ParentKeyName => self.parent_key_name = Some(value.as_string()),
            RegistryField::Tag => self.tag = Some(value.as_string()),
            RegistryField::IsPinned => self.is_pinned = value.as_flag(),
        }
    }

    /// Build a key from raw values; unknown value names are ignored
    pub fn from_values(
        hive: RegistryHive,
        key_path: &str,
        values: &BTreeMap<String, RegistryValue>,
    ) -> Self {
        let mut key = Self::new(hive, key_path);
        for (name, value) in values {
            if let Some(field) = RegistryField::ALL
                .iter()
                .find(|field| field.value_name().eq_ignore_ascii_case(name))
            {
                key.apply(*field, value);
            }
        }
        key
    }

    /// Allowlisted values that are set on this key
    pub fn persisted_values(&self) -> Vec<(RegistryField, RegistryValue)> {
        PERSISTED_FIELDS
            .iter()
            .filter_map(|field| self.value_of(*field).map(|value| (*field, value)))
            .collect()
    }

    fn identity(&self) -> (&Option<String>, &Option<String>, &Option<String>, &str) {
        (
            &self.display_name,
            &self.display_version,
            &self.uninstall_string,
            &self.key_path,
        )
    }
}

impl PartialEq for RegistryKey {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for RegistryKey {}

impl Hash for RegistryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}
