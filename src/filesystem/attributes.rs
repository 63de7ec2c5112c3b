// src/filesystem/attributes.rs

//! Restrictive file attributes (readonly, hidden, system)
//!
//! Windows exposes all three as attribute bits. Elsewhere readonly maps to the
//! write permission bits, hidden to a leading dot, and system is never set.

use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttributes {
    pub readonly: bool,
    pub hidden: bool,
    pub system: bool,
}

impl FileAttributes {
    pub fn read(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;

        #[cfg(windows)]
        {
            use std::os::windows::fs::MetadataExt;
            let bits = metadata.file_attributes();
            Ok(Self {
                readonly: bits & windows_bits::READONLY != 0,
                hidden: bits & windows_bits::HIDDEN != 0,
                system: bits & windows_bits::SYSTEM != 0,
            })
        }

        #[cfg(not(windows))]
        {
            let hidden = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with('.'))
                .unwrap_or(false);
            Ok(Self {
                readonly: metadata.permissions().readonly(),
                hidden,
                system: false,
            })
        }
    }

    pub fn is_restrictive(&self) -> bool {
        self.readonly || self.hidden || self.system
    }
}

/// Check a path's attributes, falling back to its containing directory.
///
/// A file that carries no restrictive attribute itself can still sit inside a
/// readonly/hidden/system directory; both levels are reported.
pub fn effective_attributes(path: &Path) -> io::Result<FileAttributes> {
    let own = FileAttributes::read(path)?;
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(own);
    };
    let inherited = match FileAttributes::read(parent) {
        Ok(attributes) => attributes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => FileAttributes::default(),
        Err(e) => return Err(e),
    };
    Ok(FileAttributes {
        readonly: own.readonly || inherited.readonly,
        hidden: own.hidden || inherited.hidden,
        system: own.system || inherited.system,
    })
}

/// Remove readonly, hidden and system from a single file or directory
pub fn strip_restrictive(path: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use std::os::windows::fs::MetadataExt;
        use windows::Win32::Storage::FileSystem::{FILE_FLAGS_AND_ATTRIBUTES, SetFileAttributesW};
        use windows::core::PCWSTR;

        let bits = fs::metadata(path)?.file_attributes();
        let cleared = bits & !(windows_bits::READONLY | windows_bits::HIDDEN | windows_bits::SYSTEM);
        if cleared == bits {
            return Ok(());
        }
        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
        unsafe { SetFileAttributesW(PCWSTR(wide.as_ptr()), FILE_FLAGS_AND_ATTRIBUTES(cleared)) }
            .map_err(|e| io::Error::other(e.to_string()))
    }

    #[cfg(not(windows))]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(path)?.permissions();
        if !permissions.readonly() {
            return Ok(());
        }
        permissions.set_mode(permissions.mode() | 0o200);
        fs::set_permissions(path, permissions)
    }
}

/// Mark a path readonly
pub fn set_readonly(path: &Path, readonly: bool) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = permissions.mode();
        permissions.set_mode(if readonly { mode & !0o222 } else { mode | 0o200 });
    }
    #[cfg(not(unix))]
    permissions.set_readonly(readonly);
    fs::set_permissions(path, permissions)
}

#[cfg(windows)]
mod windows_bits {
    pub const READONLY: u32 = 0x1;
    pub const HIDDEN: u32 = 0x2;
    pub const SYSTEM: u32 = 0x4;
}
