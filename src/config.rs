// src/config.rs

//! Operation configuration
//!
//! `OperationConfig` carries everything one install/upgrade/uninstall/pin run
//! needs. Persistent defaults come from `config/chocolatey.config` and are
//! applied before command-line values.

use crate::error::{Error, Result};
use crate::packages::SourceKind;
use crate::version::PackageVersion;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default limit for a single lifecycle script run
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 2700;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Install,
    Upgrade,
    Uninstall,
    List,
    Pin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCommand {
    List,
    Add,
    Remove,
}

/// External program that runs lifecycle scripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHostSettings {
    pub program: String,
    pub arguments: Vec<String>,
    /// Script file extension, without the dot
    pub extension: String,
}

impl Default for ScriptHostSettings {
    #[cfg(windows)]
    fn default() -> Self {
        Self {
            program: "powershell".to_string(),
            arguments: [
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-File",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            extension: "ps1".to_string(),
        }
    }

    #[cfg(not(windows))]
    fn default() -> Self {
        Self {
            program: "sh".to_string(),
            arguments: Vec::new(),
            extension: "sh".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationConfig {
    pub command: CommandKind,
    pub package_names: Vec<String>,
    pub version: Option<PackageVersion>,
    pub prerelease: bool,
    pub exclude_prerelease: bool,
    pub force: bool,
    pub allow_downgrade: bool,
    /// Side-by-side installs into `lib/<id>.<version>`
    pub allow_multiple_versions: bool,
    pub all_versions: bool,
    pub fail_on_not_installed: bool,
    pub noop: bool,
    pub skip_scripts: bool,
    pub keep_temp: bool,
    pub stop_on_first_failure: bool,
    pub pin_command: Option<PinCommand>,
    pub pin_source: SourceKind,
    pub sources: Vec<PathBuf>,
    pub script_host: ScriptHostSettings,
    pub command_timeout: Duration,
    pub cache_location: Option<PathBuf>,
}

impl OperationConfig {
    pub fn new(command: CommandKind) -> Self {
        Self {
            command,
            package_names: Vec::new(),
            version: None,
            prerelease: false,
            exclude_prerelease: false,
            force: false,
            allow_downgrade: false,
            allow_multiple_versions: false,
            all_versions: false,
            fail_on_not_installed: false,
            noop: false,
            skip_scripts: false,
            keep_temp: false,
            stop_on_first_failure: false,
            pin_command: None,
            pin_source: SourceKind::Archive,
            sources: Vec::new(),
            script_host: ScriptHostSettings::default(),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            cache_location: None,
        }
    }

    pub fn with_packages<I, T>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.package_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Upgrade with the literal name `all` targets every installed package
    pub fn targets_all(&self) -> bool {
        self.command == CommandKind::Upgrade
            && self.package_names.len() == 1
            && self.package_names[0].eq_ignore_ascii_case("all")
    }

    /// Apply values from the persistent file config
    pub fn apply_file_config(&mut self, file: &FileConfig) {
        if let Some(cache) = &file.cache_location {
            self.cache_location = Some(cache.clone());
        }
        if let Some(secs) = file.command_timeout_secs {
            self.command_timeout = Duration::from_secs(secs);
        }
        if let Some(program) = &file.script_host {
            self.script_host.program = program.clone();
        }
        if let Some(arguments) = &file.script_host_arguments {
            self.script_host.arguments = arguments.split_whitespace().map(str::to_string).collect();
        }
        if let Some(extension) = &file.script_extension {
            self.script_host.extension = extension.trim_start_matches('.').to_string();
        }

        self.stop_on_first_failure = file.features.stop_on_first_package_failure;
        self.allow_multiple_versions = file.features.allow_multiple_versions;
        self.keep_temp = file.features.keep_temp;
        self.fail_on_not_installed = file.features.fail_on_not_installed;

        self.sources = file
            .sources
            .iter()
            .filter(|source| !source.disabled)
            .map(|source| PathBuf::from(&source.value))
            .collect();
    }

    /// Reject malformed requests before any package is touched
    pub fn validate(&self) -> Result<()> {
        match self.command {
            CommandKind::Install | CommandKind::Upgrade | CommandKind::Uninstall => {
                if self.package_names.iter().all(|name| name.trim().is_empty()) {
                    return Err(Error::InvalidArgument(
                        "at least one package name is required".to_string(),
                    ));
                }
                if self.version.is_some() && self.package_names.len() > 1 {
                    return Err(Error::InvalidArgument(
                        "a version can only be given for a single package".to_string(),
                    ));
                }
            }
            CommandKind::Pin => {
                let Some(pin) = self.pin_command else {
                    return Err(Error::InvalidArgument("missing pin sub-command".to_string()));
                };
                let has_name = self
                    .package_names
                    .first()
                    .is_some_and(|name| !name.trim().is_empty());
                if matches!(pin, PinCommand::Add | PinCommand::Remove) && !has_name {
                    return Err(Error::InvalidArgument(
                        "a package name is required to add or remove a pin".to_string(),
                    ));
                }
            }
            CommandKind::List => {}
        }

        if self.command == CommandKind::Install && self.prerelease && self.exclude_prerelease {
            return Err(Error::InvalidArgument(
                "prerelease and exclude-prerelease cannot be combined".to_string(),
            ));
        }
        if self.command_timeout.is_zero() {
            return Err(Error::Config("command timeout must be positive".to_string()));
        }
        if self.script_host.program.trim().is_empty() {
            return Err(Error::Config("script host is not configured".to_string()));
        }
        Ok(())
    }
}

/// Contents of `chocolatey.config`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub cache_location: Option<PathBuf>,
    pub command_timeout_secs: Option<u64>,
    pub script_host: Option<String>,
    pub script_host_arguments: Option<String>,
    pub script_extension: Option<String>,
    pub features: FeatureFlags,
    pub sources: Vec<ConfigSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    pub stop_on_first_package_failure: bool,
    pub allow_multiple_versions: bool,
    pub keep_temp: bool,
    pub fail_on_not_installed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub id: String,
    pub value: String,
    pub disabled: bool,
}

impl FileConfig {
    /// Load the file config; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Self::parse(&raw).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut config = Self::default();
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) | Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    match name.as_str() {
                        "add" => config.apply_setting(&e)?,
                        "feature" => config.apply_feature(&e)?,
                        "source" => {
                            let id = attribute(&e, "id")?.unwrap_or_default();
                            let value = attribute(&e, "value")?.ok_or_else(|| {
                                Error::Config(format!("source {} has no value", id))
                            })?;
                            let disabled = parse_bool(attribute(&e, "disabled")?.as_deref())?;
                            config.sources.push(ConfigSource { id, value, disabled });
                        }
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(config)
    }

    fn apply_setting(&mut self, e: &BytesStart) -> Result<()> {
        let (Some(key), Some(value)) = (attribute(e, "key")?, attribute(e, "value")?) else {
            return Ok(());
        };
        match key.as_str() {
            "cacheLocation" if !value.trim().is_empty() => {
                self.cache_location = Some(PathBuf::from(value))
            }
            "commandExecutionTimeoutSeconds" => {
                let secs = value.trim().parse::<u64>().map_err(|_| {
                    Error::Config(format!("invalid commandExecutionTimeoutSeconds: {}", value))
                })?;
                self.command_timeout_secs = Some(secs);
            }
            "scriptHost" => self.script_host = Some(value),
            "scriptHostArguments" => self.script_host_arguments = Some(value),
            "scriptExtension" => self.script_extension = Some(value),
            _ => debug!("Ignoring config setting {}", key),
        }
        Ok(())
    }

    fn apply_feature(&mut self, e: &BytesStart) -> Result<()> {
        let Some(name) = attribute(e, "name")? else {
            return Ok(());
        };
        let enabled = parse_bool(attribute(e, "enabled")?.as_deref())?;
        match name.as_str() {
            "stopOnFirstPackageFailure" => self.features.stop_on_first_package_failure = enabled,
            "allowMultipleVersions" => self.features.allow_multiple_versions = enabled,
            "keepTemp" => self.features.keep_temp = enabled,
            "failOnNotInstalled" => self.features.fail_on_not_installed = enabled,
            _ => debug!("Ignoring feature {}", name),
        }
        Ok(())
    }
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

fn parse_bool(value: Option<&str>) -> Result<bool> {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("false") => Ok(false),
        Some("true") => Ok(true),
        Some(other) => Err(Error::Config(format!("expected true or false, got {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<chocolatey>
  <config>
    <add key="cacheLocation" value="/var/cache/choco" />
    <add key="commandExecutionTimeoutSeconds" value="60" />
    <add key="scriptHost" value="bash" />
    <add key="scriptHostArguments" value="-e" />
    <add key="unknownKey" value="x" />
  </config>
  <features>
    <feature name="stopOnFirstPackageFailure" enabled="true" />
    <feature name="keepTemp" enabled="false" />
    <feature name="allowMultipleVersions" enabled="True" />
  </features>
  <sources>
    <source id="local" value="/srv/packages" disabled="false" />
    <source id="old" value="/srv/old" disabled="true" />
  </sources>
</chocolatey>"#;

    #[test]
    fn test_parse_file_config() {
        let file = FileConfig::parse(CONFIG).unwrap();
        assert_eq!(file.cache_location, Some(PathBuf::from("/var/cache/choco")));
        assert_eq!(file.command_timeout_secs, Some(60));
        assert!(file.features.stop_on_first_package_failure);
        assert!(file.features.allow_multiple_versions);
        assert!(!file.features.keep_temp);
        assert_eq!(file.sources.len(), 2);
        assert!(file.sources[1].disabled);
    }

    #[test]
    fn test_apply_file_config() {
        let file = FileConfig::parse(CONFIG).unwrap();
        let mut config = OperationConfig::new(CommandKind::Install).with_packages(["git"]);
        config.apply_file_config(&file);

        assert_eq!(config.command_timeout, Duration::from_secs(60));
        assert_eq!(config.script_host.program, "bash");
        assert_eq!(config.script_host.arguments, vec!["-e"]);
        assert!(config.stop_on_first_failure);
        assert_eq!(config.sources, vec![PathBuf::from("/srv/packages")]);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file_is_default() {
        let temp = tempfile::tempdir().unwrap();
        let file = FileConfig::load(&temp.path().join("chocolatey.config")).unwrap();
        assert_eq!(file, FileConfig::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("chocolatey.config");
        fs::write(
            &path,
            r#"<chocolatey><features><feature name="keepTemp" enabled="maybe"/></features></chocolatey>"#,
        )
        .unwrap();
        assert!(matches!(FileConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_requests() {
        let empty = OperationConfig::new(CommandKind::Install);
        assert!(matches!(empty.validate(), Err(Error::InvalidArgument(_))));

        let mut versioned = OperationConfig::new(CommandKind::Install).with_packages(["a", "b"]);
        versioned.version = Some(PackageVersion::parse("1.0").unwrap());
        assert!(versioned.validate().is_err());

        let mut pin = OperationConfig::new(CommandKind::Pin);
        pin.pin_command = Some(PinCommand::Add);
        assert!(matches!(pin.validate(), Err(Error::InvalidArgument(_))));
        pin.pin_command = Some(PinCommand::List);
        pin.validate().unwrap();

        let mut both = OperationConfig::new(CommandKind::Install).with_packages(["a"]);
        both.prerelease = true;
        both.exclude_prerelease = true;
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_upgrade_all() {
        let config = OperationConfig::new(CommandKind::Upgrade).with_packages(["ALL"]);
        assert!(config.targets_all());
        let install = OperationConfig::new(CommandKind::Install).with_packages(["all"]);
        assert!(!install.targets_all());
    }
}
