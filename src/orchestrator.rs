// src/orchestrator.rs

//! Operation orchestrator
//!
//! Drives install, upgrade and uninstall for the packages named in an
//! `OperationConfig`. Each package moves through
//! `Resolved -> Staged -> ScriptExecuted -> Committed`, or ends in `Failed`.
//! Per-package failures are recorded in the results and the batch continues;
//! only fatal errors abort the whole operation.

use crate::config::{CommandKind, OperationConfig};
use crate::context::{InstallContext, PENDING_MARKER};
use crate::db::{self, models::PackageFileEntry, models::PackageInformation};
use crate::error::{Error, Result};
use crate::filesystem::{self, FileOperator};
use crate::installed::{PackageRegistry, decode_snapshot};
use crate::packages::{ArchivePackage, PackageArchive, PackageFile, PackageMetadata};
use crate::pin;
use crate::registry::{RegistryStore, SqliteRegistryStore};
use crate::results::{OperationResults, PackageResult};
use crate::scripts::{LifecycleScriptRunner, LifecycleStep, ProcessScriptHost, ScriptHost};
use crate::source::{LocalFolderSource, PackageSource, VersionQuery};
use crate::version::PackageVersion;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where a package is in its lifecycle within one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PackageState {
    Resolved,
    Staged,
    ScriptExecuted,
    Committed,
    Failed,
}

struct Progress {
    id: String,
    state: PackageState,
}

impl Progress {
    fn new(id: &str) -> Self {
        let progress = Self {
            id: id.to_string(),
            state: PackageState::Resolved,
        };
        debug!("{}: {:?}", progress.id, progress.state);
        progress
    }

    fn advance(&mut self, state: PackageState) {
        debug!("{}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }
}

pub struct Orchestrator<'a, H: ScriptHost, S: RegistryStore = SqliteRegistryStore> {
    ctx: &'a InstallContext,
    config: &'a OperationConfig,
    registry: PackageRegistry<S>,
    source: Box<dyn PackageSource + 'a>,
    scripts: LifecycleScriptRunner<'a, H>,
    files: FileOperator,
}

impl<'a> Orchestrator<'a, ProcessScriptHost, SqliteRegistryStore> {
    /// Build an orchestrator with the stores, sources and script host from `config`
    pub fn open(ctx: &'a InstallContext, config: &'a OperationConfig) -> Result<Self> {
        let registry = if config.noop {
            PackageRegistry::open_read_only(ctx)?
        } else {
            ctx.ensure_base_dirs()?;
            PackageRegistry::open(ctx)?
        };
        let source = LocalFolderSource::new(config.sources.iter().cloned());
        let host = ProcessScriptHost::new(config.script_host.clone(), config.command_timeout);
        Ok(Self::new(ctx, config, registry, Box::new(source), host))
    }
}

impl<'a, H: ScriptHost, S: RegistryStore> Orchestrator<'a, H, S> {
    pub fn new(
        ctx: &'a InstallContext,
        config: &'a OperationConfig,
        registry: PackageRegistry<S>,
        source: Box<dyn PackageSource + 'a>,
        host: H,
    ) -> Self {
        let scripts = LifecycleScriptRunner::new(ctx, host, config.script_host.extension.clone())
            .keep_temp(config.keep_temp);
        Self {
            ctx,
            config,
            registry,
            source,
            scripts,
            files: FileOperator::new(),
        }
    }

    pub fn registry(&self) -> &PackageRegistry<S> {
        &self.registry
    }

    /// Validate the configuration and run its command
    pub fn run(&mut self) -> Result<OperationResults> {
        self.config.validate()?;
        match self.config.command {
            CommandKind::Install => self.install(),
            CommandKind::Upgrade => self.upgrade(),
            CommandKind::Uninstall => self.uninstall(),
            CommandKind::List | CommandKind::Pin => Err(Error::InvalidArgument(format!(
                "{:?} does not change packages",
                self.config.command
            ))),
        }
    }

    pub fn install(&mut self) -> Result<OperationResults> {
        self.prepare()?;
        let mut results = OperationResults::new();
        for id in self.requested_names() {
            if results.contains(&id) {
                continue;
            }
            let mut result = PackageResult::new(&id);
            let query = self.requested_query();
            let mut chain = Vec::new();
            let outcome = self.install_one(&id, &query, &mut result, &mut results, &mut chain);
            if self.finish(outcome, result, &mut results)? {
                break;
            }
        }
        Ok(results)
    }

    pub fn upgrade(&mut self) -> Result<OperationResults> {
        self.prepare()?;
        let names = if self.config.targets_all() {
            let mut ids: Vec<String> = Vec::new();
            for package in self.registry.archive_packages()? {
                if !ids.iter().any(|id| id.eq_ignore_ascii_case(package.id())) {
                    ids.push(package.id().to_string());
                }
            }
            ids
        } else {
            self.requested_names()
        };

        let mut results = OperationResults::new();
        for id in names {
            if results.contains(&id) {
                continue;
            }
            let mut result = PackageResult::new(&id);
            let outcome = self.upgrade_one(&id, &mut result, &mut results);
            if self.finish(outcome, result, &mut results)? {
                break;
            }
        }
        Ok(results)
    }

    pub fn uninstall(&mut self) -> Result<OperationResults> {
        let mut results = OperationResults::new();
        for id in self.requested_names() {
            let mut result = PackageResult::new(&id);
            let outcome = self.uninstall_one(&id, &mut result);
            if self.finish(outcome, result, &mut results)? {
                break;
            }
        }
        Ok(results)
    }

    /// Record a package outcome; returns whether the batch must stop
    fn finish(
        &self,
        outcome: Result<()>,
        mut result: PackageResult,
        results: &mut OperationResults,
    ) -> Result<bool> {
        if let Err(e) = outcome {
            if e.is_fatal() {
                return Err(e);
            }
            warn!("{}: {}", result.id, e);
            result.error(e.to_string());
        }
        let stop = !result.success() && self.config.stop_on_first_failure;
        if stop {
            warn!("Stopping after failure of {}", result.id);
        }
        results.insert(result);
        Ok(stop)
    }

    fn prepare(&self) -> Result<()> {
        if self.config.noop {
            return Ok(());
        }
        self.ctx.ensure_base_dirs()?;
        self.quarantine_pending()
    }

    /// Names from the configuration, trimmed and without duplicates
    fn requested_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in &self.config.package_names {
            let name = name.trim();
            if !name.is_empty() && !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name.to_string());
            }
        }
        names
    }

    fn requested_query(&self) -> VersionQuery {
        match &self.config.version {
            Some(version) => VersionQuery::exact(version.clone()),
            None => VersionQuery::latest(self.config.prerelease && !self.config.exclude_prerelease),
        }
    }

    /// Move folders left by interrupted installs out of the packages folder
    fn quarantine_pending(&self) -> Result<()> {
        for folder in self.registry.pending_packages()? {
            let marker = fs::read_to_string(folder.join(PENDING_MARKER)).unwrap_or_default();
            let mut parts = marker.split_whitespace();
            let folder_name = folder
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let id = parts.next().map(str::to_string).unwrap_or(folder_name);
            let version = parts.next().unwrap_or("unknown").to_string();

            let bad = self.ctx.bad_package_dir(&id, &version);
            warn!(
                "{} was left pending by an interrupted install, moving it to {}",
                folder.display(),
                bad.display()
            );
            self.files.delete_directory(&bad, true, true)?;
            self.files.move_directory(&folder, &bad)?;
        }
        Ok(())
    }

    fn install_one(
        &mut self,
        id: &str,
        query: &VersionQuery,
        result: &mut PackageResult,
        results: &mut OperationResults,
        chain: &mut Vec<String>,
    ) -> Result<()> {
        self.install_version(id, query, self.config.force, result, results, chain)
    }

    /// Install `id`; with `replace` an existing install is swapped for the resolved version
    fn install_version(
        &mut self,
        id: &str,
        query: &VersionQuery,
        replace: bool,
        result: &mut PackageResult,
        results: &mut OperationResults,
        chain: &mut Vec<String>,
    ) -> Result<()> {
        let existing = self.registry.find_archive(id)?;
        let side_by_side = self.config.allow_multiple_versions;

        if let Some(current) = existing.first() {
            if !replace && !side_by_side {
                already_installed(current, result);
                return Ok(());
            }
        }

        let archive = self.resolve(id, query)?;
        let manifest = archive.manifest();
        if let Some(same) = existing.iter().find(|p| *p.version() == manifest.version) {
            if !replace {
                already_installed(same, result);
                return Ok(());
            }
        }
        result.version = Some(manifest.version.clone());

        chain.push(id.to_ascii_lowercase());
        let deps = self.ensure_dependencies(&archive, result, results, chain);
        chain.pop();
        deps?;

        let install_dir = self.install_dir(&archive);
        if self.config.noop {
            info!(
                "Would install {} {} to {}",
                manifest.id,
                manifest.version,
                install_dir.display()
            );
            result.note(format!("Would have installed {} v{}", manifest.id, manifest.version));
            return Ok(());
        }

        let previous = existing
            .into_iter()
            .find(|p| p.install_location == install_dir);
        self.apply_archive(&archive, previous, &install_dir, result)
    }

    fn upgrade_one(
        &mut self,
        id: &str,
        result: &mut PackageResult,
        results: &mut OperationResults,
    ) -> Result<()> {
        let installed = self.registry.find_archive(id)?;
        let Some(current) = installed.first().cloned() else {
            if self.config.fail_on_not_installed {
                return Err(Error::PackageNotFound(format!("{} is not installed", id)));
            }
            info!("{} is not installed, installing it", id);
            let query = self.requested_query();
            return self.install_one(id, &query, result, results, &mut Vec::new());
        };
        result.version = Some(current.version().clone());
        result.install_location = Some(current.install_location.clone());

        if !pin::upgrade_allowed(&current, self.config.force) {
            if self.config.targets_all() {
                result.warn(format!(
                    "{} is pinned at v{}, skipping upgrade",
                    current.id(),
                    current.version()
                ));
                return Ok(());
            }
            return Err(Error::Resolution(format!(
                "{}: v{} is pinned. Remove the pin or use --force to upgrade it",
                current.id(),
                current.version()
            )));
        }

        let prerelease = self.config.prerelease && !self.config.exclude_prerelease;
        let query = match &self.config.version {
            Some(version) => VersionQuery::exact(version.clone()),
            None => VersionQuery::latest(prerelease || current.version().is_prerelease()),
        };
        let archive = self.resolve(id, &query)?;
        let available = archive.manifest().version.clone();

        if available < *current.version() && !self.config.allow_downgrade {
            return Err(Error::Resolution(format!(
                "{}: v{} is older than installed v{}. Use --allow-downgrade to install it",
                id,
                available,
                current.version()
            )));
        }
        if available == *current.version() && !self.config.force {
            result.note(format!(
                "{} v{} is the latest version available",
                current.id(),
                current.version()
            ));
            return Ok(());
        }
        let present = installed.iter().any(|p| *p.version() == available);
        if self.config.allow_multiple_versions && present && !self.config.force {
            result.note(format!("{} v{} is already installed side by side", id, available));
            return Ok(());
        }

        let mut chain = vec![id.to_ascii_lowercase()];
        self.ensure_dependencies(&archive, result, results, &mut chain)?;

        result.version = Some(available.clone());
        if self.config.noop {
            info!("Would upgrade {} from {} to {}", id, current.version(), available);
            result.note(format!(
                "Would have upgraded {} v{} to v{}",
                id,
                current.version(),
                available
            ));
            return Ok(());
        }

        let install_dir = self.install_dir(&archive);
        let previous = installed
            .into_iter()
            .find(|p| p.install_location == install_dir);
        self.apply_archive(&archive, previous, &install_dir, result)?;
        info!("Upgraded {} from {} to {}", id, current.version(), available);
        Ok(())
    }

    fn uninstall_one(&mut self, id: &str, result: &mut PackageResult) -> Result<()> {
        let installed = self.registry.find_archive(id)?;
        if installed.is_empty() {
            return Err(Error::PackageNotFound(format!("{} is not installed", id)));
        }

        let targets: Vec<ArchivePackage> = match &self.config.version {
            Some(version) => installed
                .into_iter()
                .filter(|p| p.version() == version)
                .collect(),
            None if self.config.all_versions || installed.len() == 1 => installed,
            None => {
                let versions: Vec<String> = installed.iter().map(|p| p.version().to_string()).collect();
                return Err(Error::Resolution(format!(
                    "{}: multiple versions installed ({}). Specify --version or --all-versions",
                    id,
                    versions.join(", ")
                )));
            }
        };
        let Some(first) = targets.first() else {
            let wanted = self
                .config
                .version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default();
            return Err(Error::PackageNotFound(format!("{} v{}", id, wanted)));
        };
        result.version = Some(first.version().clone());

        for package in &targets {
            if self.config.noop {
                info!(
                    "Would uninstall {} {} from {}",
                    package.id(),
                    package.version(),
                    package.install_location.display()
                );
                result.note(format!(
                    "Would have uninstalled {} v{}",
                    package.id(),
                    package.version()
                ));
                continue;
            }
            self.remove_package(package, result)?;
        }
        Ok(())
    }

    fn remove_package(&mut self, package: &ArchivePackage, result: &mut PackageResult) -> Result<()> {
        let id = package.id().to_string();
        let version = package.version().to_string();
        let location = package.install_location.clone();
        let mut progress = Progress::new(&id);

        if !self.config.skip_scripts {
            if let Err(e) = self.scripts.run(LifecycleStep::BeforeModify, &id, &version, &location) {
                if e.is_fatal() {
                    return Err(e);
                }
                result.warn(format!("before_modify script failed: {}", e));
            }
            if let Err(e) = self.scripts.run(LifecycleStep::Uninstall, &id, &version, &location) {
                progress.advance(PackageState::Failed);
                return Err(e);
            }
        }
        progress.advance(PackageState::ScriptExecuted);

        let recorded = match &package.information {
            Some(info) => decode_snapshot(info)?,
            None => Vec::new(),
        };

        self.files.delete_directory(&location, true, true)?;
        self.files
            .delete_directory(&self.ctx.package_backup_dir(&id), true, true)?;
        PackageInformation::delete(self.registry.connection(), &id, &version)?;
        progress.advance(PackageState::Committed);

        for key in recorded {
            if self.registry.native().contains(&key)? {
                result.warn(format!(
                    "{} is still registered as installed software ({}). Its own uninstaller may need to be run",
                    key.display_name.as_deref().unwrap_or(key.subkey_name()),
                    key.key_path
                ));
            }
        }

        result.install_location = Some(location);
        result.note(format!("{} v{} has been uninstalled", id, version));
        info!("Uninstalled {} {}", id, version);
        Ok(())
    }

    fn resolve(&self, id: &str, query: &VersionQuery) -> Result<PackageArchive> {
        self.source.find_package(id, query)?.ok_or_else(|| {
            let wanted = match &query.exact {
                Some(version) => format!("{} v{} in {}", id, version, self.source.name()),
                None => format!("{} in {}", id, self.source.name()),
            };
            Error::PackageNotFound(wanted)
        })
    }

    /// Install declared dependencies that are missing or out of range
    fn ensure_dependencies(
        &mut self,
        archive: &PackageArchive,
        result: &mut PackageResult,
        results: &mut OperationResults,
        chain: &mut Vec<String>,
    ) -> Result<()> {
        let prerelease = self.config.prerelease && !self.config.exclude_prerelease;
        for dep in archive.manifest().dependencies() {
            let installed = self.registry.find_archive(&dep.id)?;
            if installed
                .iter()
                .any(|package| dep.range.satisfies(package.version()))
            {
                debug!("Dependency {} {} already satisfied", dep.id, dep.range);
                continue;
            }
            let outdated = if self.config.allow_multiple_versions {
                None
            } else {
                installed.first()
            };
            if let Some(current) = outdated {
                if !pin::upgrade_allowed(current, self.config.force) {
                    return Err(Error::Resolution(format!(
                        "dependency {} is pinned at v{}, which is outside {}",
                        dep.id,
                        current.version(),
                        dep.range
                    )));
                }
            }
            if chain.contains(&dep.id.to_ascii_lowercase()) {
                return Err(Error::Resolution(format!(
                    "circular dependency {} -> {}",
                    chain.join(" -> "),
                    dep.id
                )));
            }
            if let Some(done) = results.get(&dep.id) {
                if !done.success() {
                    return Err(Error::Resolution(format!("dependency {} failed", dep.id)));
                }
                if done.version.as_ref().is_some_and(|v| dep.range.satisfies(v)) {
                    continue;
                }
            }

            let mut dep_result = PackageResult::new(&dep.id);
            let query = VersionQuery::latest(prerelease).within(dep.range.clone());
            chain.push(dep.id.to_ascii_lowercase());
            let outcome = match outdated {
                Some(current) => {
                    info!(
                        "Replacing dependency {} v{} to satisfy {}",
                        dep.id,
                        current.version(),
                        dep.range
                    );
                    self.install_version(&dep.id, &query, true, &mut dep_result, results, chain)
                }
                None => {
                    info!("Installing dependency {} {}", dep.id, dep.range);
                    self.install_one(&dep.id, &query, &mut dep_result, results, chain)
                }
            };
            chain.pop();

            let failed = match outcome {
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    dep_result.error(e.to_string());
                    true
                }
                Ok(()) => !dep_result.success(),
            };
            results.insert(dep_result);
            if failed {
                return Err(Error::Resolution(format!(
                    "dependency {} {} could not be installed",
                    dep.id, dep.range
                )));
            }
            match outdated {
                Some(current) => result.note(format!(
                    "Upgraded dependency {} from v{} to satisfy {}",
                    dep.id,
                    current.version(),
                    dep.range
                )),
                None => result.note(format!("Installed dependency {}", dep.id)),
            }
        }
        Ok(())
    }

    fn install_dir(&self, archive: &PackageArchive) -> PathBuf {
        let manifest = archive.manifest();
        let version = manifest.version.to_string();
        self.ctx.package_install_dir(
            &manifest.id,
            self.config
                .allow_multiple_versions
                .then_some(version.as_str()),
        )
    }

    /// Stage, script and commit one archive, rolling back on failure
    fn apply_archive(
        &mut self,
        archive: &PackageArchive,
        previous: Option<ArchivePackage>,
        install_dir: &Path,
        result: &mut PackageResult,
    ) -> Result<()> {
        let manifest = archive.manifest();
        let id = manifest.id.clone();
        let version = manifest.version.to_string();
        let mut progress = Progress::new(&id);
        let mut backed_up = false;

        let outcome = self.stage_and_commit(
            archive,
            previous.as_ref(),
            install_dir,
            &mut progress,
            &mut backed_up,
            result,
        );

        match outcome {
            Ok(()) => {
                result.install_location = Some(install_dir.to_path_buf());
                result.note(format!(
                    "{} v{} installed to {}",
                    id,
                    version,
                    install_dir.display()
                ));
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                progress.advance(PackageState::Failed);
                Err(e)
            }
            Err(e) => {
                let reached = progress.state;
                progress.advance(PackageState::Failed);
                self.roll_back(&id, &version, install_dir, reached, backed_up);
                Err(e)
            }
        }
    }

    fn stage_and_commit(
        &mut self,
        archive: &PackageArchive,
        previous: Option<&ArchivePackage>,
        install_dir: &Path,
        progress: &mut Progress,
        backed_up: &mut bool,
        result: &mut PackageResult,
    ) -> Result<()> {
        let manifest = archive.manifest();
        let id = manifest.id.as_str();
        let version = manifest.version.to_string();

        if let Some(previous) = previous {
            if !self.config.skip_scripts {
                let prev_version = previous.version().to_string();
                if let Err(e) = self.scripts.run(
                    LifecycleStep::BeforeModify,
                    previous.id(),
                    &prev_version,
                    &previous.install_location,
                ) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    result.warn(format!("before_modify script failed: {}", e));
                }
            }
        }

        if install_dir.exists() {
            let backup = self.ctx.package_backup_dir(id);
            self.files.delete_directory(&backup, true, true)?;
            self.files.move_directory(install_dir, &backup)?;
            *backed_up = true;
            debug!("Backed up {} to {}", install_dir.display(), backup.display());
        }

        self.files.create_directory(&self.ctx.temp_dir())?;
        let staging = tempfile::Builder::new()
            .prefix("staging-")
            .tempdir_in(self.ctx.temp_dir())?;
        archive.extract_to(staging.path())?;
        self.files.write_file(
            &staging.path().join(PENDING_MARKER),
            &format!("{} {}", id, version),
        )?;
        self.files.move_directory(staging.path(), install_dir)?;
        progress.advance(PackageState::Staged);

        let before = self.registry.native().snapshot()?;
        if !self.config.skip_scripts {
            self.scripts
                .run(LifecycleStep::Install, id, &version, install_dir)?;
        }
        let added = self.registry.native().snapshot()?.added_since(&before);
        progress.advance(PackageState::ScriptExecuted);

        let checksums = checksum_tree(install_dir)?;
        let records: Vec<PackageFile> = checksums
            .into_iter()
            .map(|(path, checksum)| PackageFile::new(self.ctx, &path, checksum))
            .collect();

        let mut information = previous
            .and_then(|p| p.information.clone())
            .filter(|info| info.version == version)
            .unwrap_or_else(|| PackageInformation::new(id.to_string(), version.clone()));
        if let Some(pinned) = previous.map(|p| p.is_pinned()) {
            information.is_pinned = pinned;
        }
        information.is_side_by_side = self.config.allow_multiple_versions;
        information.registry_snapshot = if added.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&added)?)
        };

        db::transaction(self.registry.connection_mut(), |tx| {
            let info_id = information.save(tx)?;
            PackageFileEntry::delete_by_package(tx, info_id)?;
            for record in &records {
                PackageFileEntry::new(
                    info_id,
                    record.stored_path().to_string(),
                    record.checksum.clone(),
                )
                .insert(tx)?;
            }
            if let Some(previous) = previous {
                let prev_version = previous.version().to_string();
                if prev_version != version {
                    PackageInformation::delete(tx, previous.id(), &prev_version)?;
                }
            }
            Ok(())
        })?;

        self.files.delete_file(&install_dir.join(PENDING_MARKER))?;
        if *backed_up {
            let backup = self.ctx.package_backup_dir(id);
            if let Err(e) = self.files.delete_directory(&backup, true, true) {
                warn!("Could not remove backup {}: {}", backup.display(), e);
            }
        }
        progress.advance(PackageState::Committed);

        for key in &added {
            result.note(format!(
                "Registered installed software: {}",
                key.display_name.as_deref().unwrap_or(key.subkey_name())
            ));
        }
        info!("Installed {} {} ({} files)", id, version, records.len());
        Ok(())
    }

    /// Move a failed install aside and bring back the previous version
    fn roll_back(
        &self,
        id: &str,
        version: &str,
        install_dir: &Path,
        reached: PackageState,
        backed_up: bool,
    ) {
        if reached >= PackageState::Staged && install_dir.exists() {
            let bad = self.ctx.bad_package_dir(id, version);
            let moved = self
                .files
                .delete_directory(&bad, true, true)
                .and_then(|()| self.files.move_directory(install_dir, &bad));
            match moved {
                Ok(()) => warn!("Moved failed install of {} to {}", id, bad.display()),
                Err(e) => warn!("Could not move {} to {}: {}", install_dir.display(), bad.display(), e),
            }
        }

        if backed_up {
            let backup = self.ctx.package_backup_dir(id);
            if install_dir.exists() {
                if let Err(e) = self.files.delete_directory(install_dir, true, true) {
                    warn!("Could not clear {}: {}", install_dir.display(), e);
                    return;
                }
            }
            match self.files.move_directory(&backup, install_dir) {
                Ok(()) => info!("Restored previous version of {} from backup", id),
                Err(e) => warn!(
                    "Could not restore {} from {}: {}",
                    id,
                    backup.display(),
                    e
                ),
            }
        }
    }
}

fn already_installed(package: &ArchivePackage, result: &mut PackageResult) {
    result.version = Some(package.version().clone());
    result.install_location = Some(package.install_location.clone());
    result.warn(format!(
        "{} v{} already installed. Use --force to reinstall, or upgrade to get a newer version.",
        package.id(),
        package.version()
    ));
}

/// SHA-256 of every file below `root` except the pending marker
fn checksum_tree(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let files: Vec<PathBuf> = filesystem::walk(root)?
        .into_iter()
        .filter(|path| path.is_file())
        .filter(|path| path.file_name().is_none_or(|name| name != PENDING_MARKER))
        .collect();

    // Hash everything before reporting so one bad file does not hide others
    let hashed: Vec<Result<(PathBuf, String)>> = files
        .par_iter()
        .map(|path| filesystem::file_checksum(path).map(|sum| (path.clone(), sum)))
        .collect();

    let mut checksums = Vec::with_capacity(hashed.len());
    let mut first_error = None;
    for entry in hashed {
        match entry {
            Ok(pair) => checksums.push(pair),
            Err(e) => {
                warn!("Checksum failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => {
            checksums.sort();
            Ok(checksums)
        }
    }
}

/// Highest installed version of an archive package
pub fn installed_version<S: RegistryStore>(
    registry: &PackageRegistry<S>,
    id: &str,
) -> Result<Option<PackageVersion>> {
    Ok(registry
        .find_archive(id)?
        .first()
        .map(|package| package.version().clone()))
}
