// src/packages/manifest.rs

//! Package manifest (`.nuspec`) parser

use crate::error::{Error, Result};
use crate::version::{PackageVersion, VersionRange};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Manifest file extension inside an archive and in the package folder
pub const MANIFEST_EXTENSION: &str = "nuspec";

/// Metadata carried by a package archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    pub id: String,
    pub version: PackageVersion,
    pub title: Option<String>,
    pub authors: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub release_notes: Option<String>,
    pub project_url: Option<String>,
    pub dependency_sets: Vec<DependencySet>,
}

/// Dependencies declared for one target framework (or for all, when `None`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySet {
    pub target_framework: Option<String>,
    pub dependencies: Vec<PackageDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDependency {
    pub id: String,
    pub range: VersionRange,
}

impl PackageManifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::parse(&raw)
            .map_err(|e| Error::Manifest(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut stack: Vec<String> = Vec::new();
        let mut builder = ManifestBuilder::default();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let name = local_name(&e);
                    builder.open(&name, &e, &stack)?;
                    stack.push(name);
                }
                Event::Empty(e) => {
                    let name = local_name(&e);
                    builder.open(&name, &e, &stack)?;
                    builder.close(&name);
                }
                Event::Text(e) => {
                    let text = e.unescape()?.to_string();
                    if stack.len() == 3 && stack[1] == "metadata" {
                        builder.text(&stack[2], text);
                    }
                }
                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    builder.close(&name);
                    stack.pop();
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let manifest = builder.build()?;
        debug!(
            "Parsed manifest: {} version {} ({} dependency sets)",
            manifest.id,
            manifest.version,
            manifest.dependency_sets.len()
        );
        Ok(manifest)
    }

    /// Every declared dependency across sets, first declaration of an id wins
    pub fn dependencies(&self) -> Vec<&PackageDependency> {
        let mut seen = Vec::<&str>::new();
        let mut deps = Vec::new();
        for dep in self.dependency_sets.iter().flat_map(|set| &set.dependencies) {
            if seen.iter().any(|id| id.eq_ignore_ascii_case(&dep.id)) {
                continue;
            }
            seen.push(&dep.id);
            deps.push(dep);
        }
        deps
    }

    /// File name the manifest is stored under in an installed package folder
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, MANIFEST_EXTENSION)
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn attribute(e: &BytesStart, key: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == key.as_bytes() {
            return Ok(Some(attr.unescape_value()?.to_string()));
        }
    }
    Ok(None)
}

#[derive(Default)]
struct ManifestBuilder {
    id: Option<String>,
    version: Option<String>,
    title: Option<String>,
    authors: Option<String>,
    description: Option<String>,
    tags: Option<String>,
    release_notes: Option<String>,
    project_url: Option<String>,
    sets: Vec<DependencySet>,
    current_group: Option<DependencySet>,
    ungrouped: Vec<PackageDependency>,
}

impl ManifestBuilder {
    fn open(&mut self, name: &str, e: &BytesStart, stack: &[String]) -> Result<()> {
        let in_dependencies = stack.iter().any(|s| s == "dependencies");
        match name {
            "group" if in_dependencies => {
                self.current_group = Some(DependencySet {
                    target_framework: attribute(e, "targetFramework")?,
                    dependencies: Vec::new(),
                });
            }
            "dependency" if in_dependencies => {
                let id = attribute(e, "id")?
                    .ok_or_else(|| Error::Manifest("dependency without id".to_string()))?;
                validate_package_id(&id)?;
                let range = match attribute(e, "version")? {
                    Some(range) => VersionRange::parse(&range)?,
                    None => VersionRange::any(),
                };
                let dep = PackageDependency { id, range };
                match self.current_group.as_mut() {
                    Some(group) => group.dependencies.push(dep),
                    None => self.ungrouped.push(dep),
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &str) {
        if name == "group" {
            if let Some(group) = self.current_group.take() {
                self.sets.push(group);
            }
        }
    }

    fn text(&mut self, element: &str, text: String) {
        match element {
            "id" => self.id = Some(text),
            "version" => self.version = Some(text),
            "title" => self.title = Some(text),
            "authors" => self.authors = Some(text),
            "description" => self.description = Some(text),
            "tags" => self.tags = Some(text),
            "releaseNotes" => self.release_notes = Some(text),
            "projectUrl" => self.project_url = Some(text),
            _ => {}
        }
    }

    fn build(mut self) -> Result<PackageManifest> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::Manifest("missing <id>".to_string()))?;
        validate_package_id(id.trim())?;
        let version = self
            .version
            .ok_or_else(|| Error::Manifest(format!("missing <version> for {}", id)))?;

        if !self.ungrouped.is_empty() {
            self.sets.insert(
                0,
                DependencySet {
                    target_framework: None,
                    dependencies: self.ungrouped,
                },
            );
        }

        Ok(PackageManifest {
            id: id.trim().to_string(),
            version: PackageVersion::parse(&version)?,
            title: self.title,
            authors: self.authors,
            description: self.description,
            tags: self
                .tags
                .map(|tags| tags.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            release_notes: self.release_notes,
            project_url: self.project_url,
            dependency_sets: self.sets,
        })
    }
}

/// Package ids name folders under `lib/`, so only `[A-Za-z0-9._-]` is allowed
pub fn validate_package_id(id: &str) -> Result<()> {
    let allowed = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if id.is_empty() || !allowed || id.starts_with('.') || id.contains("..") {
        return Err(Error::Manifest(format!("invalid package id '{}'", id)));
    }
    Ok(())
}
