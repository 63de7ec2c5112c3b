// src/packages/archive.rs

//! Package archive (`.nupkg`) reader

use crate::error::{Error, Result};
use crate::packages::manifest::{MANIFEST_EXTENSION, PackageManifest};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

/// Archive file extension
pub const ARCHIVE_EXTENSION: &str = "nupkg";

/// A zip archive holding a manifest and a content tree
#[derive(Debug, Clone)]
pub struct PackageArchive {
    path: PathBuf,
    manifest: PackageManifest,
    manifest_entry: String,
}

impl PackageArchive {
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening package archive: {}", path.display());
        let mut archive = ZipArchive::new(File::open(path)?)?;

        let manifest_entry = archive
            .file_names()
            .find(|name| is_root_manifest(name))
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Manifest(format!("no manifest found in {}", path.display()))
            })?;

        let mut raw = String::new();
        archive.by_name(&manifest_entry)?.read_to_string(&mut raw)?;
        let manifest = PackageManifest::parse(&raw)
            .map_err(|e| Error::Manifest(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            manifest,
            manifest_entry,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    /// Extract the content tree into `dest` and return the files written.
    ///
    /// Packaging metadata is skipped and the manifest lands as `<id>.nuspec`.
    pub fn extract_to(&self, dest: &Path) -> Result<Vec<PathBuf>> {
        let mut archive = ZipArchive::new(File::open(&self.path)?)?;
        fs::create_dir_all(dest)?;

        let mut written = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            if is_packaging_metadata(&name) {
                continue;
            }

            let target = if name == self.manifest_entry {
                dest.join(self.manifest.file_name())
            } else {
                let Some(enclosed) = entry.enclosed_name().map(|p| dest.join(p)) else {
                    return Err(Error::Manifest(format!(
                        "archive entry {} escapes the package folder",
                        name
                    )));
                };
                enclosed
            };

            if entry.is_dir() || name.ends_with('/') {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&target)?;
            io::copy(&mut entry, &mut outfile)?;
            written.push(target);
        }

        debug!(
            "Extracted {} files from {} to {}",
            written.len(),
            self.path.display(),
            dest.display()
        );
        Ok(written)
    }
}

fn is_root_manifest(name: &str) -> bool {
    !name.contains('/')
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MANIFEST_EXTENSION))
}

fn is_packaging_metadata(name: &str) -> bool {
    name == "[Content_Types].xml" || name.starts_with("_rels/") || name.starts_with("package/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn write_archive(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, content) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    const MANIFEST: &str =
        "<package><metadata><id>demo</id><version>1.2.0</version></metadata></package>";

    #[test]
    fn test_open_reads_manifest() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("demo.1.2.0.nupkg");
        write_archive(&path, &[("Demo.nuspec", MANIFEST), ("tools/run.sh", "echo")]);

        let archive = PackageArchive::open(&path).unwrap();
        assert_eq!(archive.manifest().id, "demo");
        assert_eq!(archive.manifest().version.to_string(), "1.2.0");
    }

    #[test]
    fn test_extract_skips_packaging_metadata() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("demo.nupkg");
        write_archive(
            &path,
            &[
                ("Demo.nuspec", MANIFEST),
                ("[Content_Types].xml", "<Types/>"),
                ("_rels/.rels", "<Relationships/>"),
                ("package/services/metadata/core.psmdcp", "x"),
                ("tools/run.sh", "echo hi"),
            ],
        );

        let dest = temp.path().join("lib").join("demo");
        let written = PackageArchive::open(&path).unwrap().extract_to(&dest).unwrap();

        assert_eq!(written.len(), 2);
        assert!(dest.join("demo.nuspec").is_file());
        assert_eq!(fs::read_to_string(dest.join("tools/run.sh")).unwrap(), "echo hi");
        assert!(!dest.join("_rels").exists());
        assert!(!dest.join("[Content_Types].xml").exists());
    }

    #[test]
    fn test_archive_without_manifest() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("broken.nupkg");
        write_archive(&path, &[("tools/readme.txt", "no manifest here")]);

        assert!(matches!(
            PackageArchive::open(&path),
            Err(Error::Manifest(_))
        ));
    }
}
