// src/scripts.rs

//! Lifecycle script runner
//!
//! Packages may ship `tools/chocolateyInstall`, `tools/chocolateyBeforeModify`
//! and `tools/chocolateyUninstall` scripts. Each is run through an external
//! script host inside a private working directory.

use crate::config::ScriptHostSettings;
use crate::context::InstallContext;
use crate::error::{Error, Result};
use crate::filesystem::FileOperator;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Folder inside a package that holds its scripts
const TOOLS_DIR: &str = "tools";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStep {
    Install,
    BeforeModify,
    Uninstall,
}

impl LifecycleStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStep::Install => "install",
            LifecycleStep::BeforeModify => "before_modify",
            LifecycleStep::Uninstall => "uninstall",
        }
    }

    fn script_stem(&self) -> &'static str {
        match self {
            LifecycleStep::Install => "chocolateyInstall",
            LifecycleStep::BeforeModify => "chocolateyBeforeModify",
            LifecycleStep::Uninstall => "chocolateyUninstall",
        }
    }

    /// Script for this step inside an installed package folder, if shipped
    pub fn script_path(&self, install_location: &Path, extension: &str) -> Option<PathBuf> {
        let tools = install_location.join(TOOLS_DIR);
        let wanted = format!("{}.{}", self.script_stem(), extension);
        let entries = std::fs::read_dir(&tools).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .is_some_and(|name| name.to_string_lossy().eq_ignore_ascii_case(&wanted))
            })
    }
}

impl fmt::Display for LifecycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LifecycleStep {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "install" => Ok(LifecycleStep::Install),
            "before_modify" | "beforemodify" => Ok(LifecycleStep::BeforeModify),
            "uninstall" => Ok(LifecycleStep::Uninstall),
            _ => Err(Error::InvalidArgument(format!("unknown lifecycle step: {}", s))),
        }
    }
}

/// Everything a host needs to run one script
#[derive(Debug, Clone)]
pub struct ScriptInvocation<'a> {
    pub step: LifecycleStep,
    pub package_id: &'a str,
    pub package_version: &'a str,
    pub install_location: &'a Path,
    pub script: &'a Path,
    pub working_dir: &'a Path,
    pub install_root: &'a Path,
}

/// Runs package scripts; returns the exit code
pub trait ScriptHost {
    fn run(&self, invocation: &ScriptInvocation<'_>) -> Result<i32>;
}

/// Script host backed by an external process
#[derive(Debug, Clone)]
pub struct ProcessScriptHost {
    settings: ScriptHostSettings,
    timeout: Duration,
}

impl ProcessScriptHost {
    pub fn new(settings: ScriptHostSettings, timeout: Duration) -> Self {
        Self { settings, timeout }
    }
}

impl ScriptHost for ProcessScriptHost {
    fn run(&self, invocation: &ScriptInvocation<'_>) -> Result<i32> {
        let script_error = |message: String| Error::Script {
            step: invocation.step.to_string(),
            message,
        };

        let mut command = Command::new(&self.settings.program);
        command
            .args(&self.settings.arguments)
            .arg(invocation.script)
            .current_dir(invocation.working_dir)
            .env("ChocolateyInstall", invocation.install_root)
            .env("ChocolateyPackageName", invocation.package_id)
            .env("ChocolateyPackageVersion", invocation.package_version)
            .env("ChocolateyPackageFolder", invocation.install_location)
            .env("ChocolateyLifecycleStep", invocation.step.as_str())
            .env("TEMP", invocation.working_dir)
            .env("TMPDIR", invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(
            "Running {} {:?} {}",
            self.settings.program,
            self.settings.arguments,
            invocation.script.display()
        );
        let mut child = command
            .spawn()
            .map_err(|e| script_error(format!("failed to start {}: {}", self.settings.program, e)))?;

        let stdout = child.stdout.take().map(|out| forward_lines(out, false));
        let stderr = child.stderr.take().map(|err| forward_lines(err, true));

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                // Best effort; the process may have just exited
                let _ = child.kill();
                let _ = child.wait();
                return Err(script_error(format!(
                    "timed out after {} seconds",
                    self.timeout.as_secs()
                )));
            }
            thread::sleep(Duration::from_millis(50));
        };

        for handle in [stdout, stderr].into_iter().flatten() {
            let _ = handle.join();
        }

        Ok(status.code().unwrap_or(-1))
    }
}

fn forward_lines<R: Read + Send + 'static>(stream: R, is_stderr: bool) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines().map_while(|line| line.ok()) {
            if is_stderr {
                warn!("{}", line);
            } else {
                info!("{}", line);
            }
        }
    })
}

/// Runs lifecycle steps for packages under one install context
pub struct LifecycleScriptRunner<'a, H: ScriptHost> {
    ctx: &'a InstallContext,
    host: H,
    extension: String,
    keep_temp: bool,
    files: FileOperator,
}

impl<'a, H: ScriptHost> LifecycleScriptRunner<'a, H> {
    pub fn new(ctx: &'a InstallContext, host: H, extension: impl Into<String>) -> Self {
        Self {
            ctx,
            host,
            extension: extension.into(),
            keep_temp: false,
            files: FileOperator::new().silent(true),
        }
    }

    pub fn keep_temp(mut self, keep: bool) -> Self {
        self.keep_temp = keep;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Run `step` by name for a package
    pub fn run_named(
        &self,
        step: &str,
        package_id: &str,
        package_version: &str,
        install_location: &Path,
    ) -> Result<bool> {
        let step = step.parse::<LifecycleStep>()?;
        self.run(step, package_id, package_version, install_location)
    }

    /// Run `step` for a package; returns `false` when the package ships no script
    pub fn run(
        &self,
        step: LifecycleStep,
        package_id: &str,
        package_version: &str,
        install_location: &Path,
    ) -> Result<bool> {
        let Some(script) = step.script_path(install_location, &self.extension) else {
            debug!("{} has no {} script", package_id, step);
            return Ok(false);
        };

        let working_dir = if self.keep_temp {
            self.ctx
                .script_diagnostics_dir()
                .join(format!("{}.{}", package_id, package_version))
                .join(step.to_string())
        } else {
            self.ctx.script_temp_dir()
        };
        if working_dir.exists() {
            self.files.delete_directory(&working_dir, true, true)?;
        }
        self.files.create_directory(&working_dir)?;

        info!("Running {} script for {} {}", step, package_id, package_version);
        let invocation = ScriptInvocation {
            step,
            package_id,
            package_version,
            install_location,
            script: &script,
            working_dir: &working_dir,
            install_root: self.ctx.root(),
        };
        let outcome = self.host.run(&invocation);

        if self.keep_temp {
            info!("Script working directory kept at {}", working_dir.display());
        } else if let Err(e) = self.files.delete_directory(&working_dir, true, true) {
            warn!("Could not remove {}: {}", working_dir.display(), e);
        }

        match outcome? {
            0 => Ok(true),
            code => Err(Error::Script {
                step: step.to_string(),
                message: format!("{} exited with code {}", script.display(), code),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    /// Host that records invocations instead of spawning anything
    struct RecordingHost {
        calls: RefCell<Vec<(LifecycleStep, PathBuf)>>,
        exit_code: i32,
    }

    impl RecordingHost {
        fn new(exit_code: i32) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                exit_code,
            }
        }
    }

    impl ScriptHost for RecordingHost {
        fn run(&self, invocation: &ScriptInvocation<'_>) -> Result<i32> {
            assert!(invocation.working_dir.is_dir());
            fs::write(invocation.working_dir.join("trace.log"), invocation.package_id).unwrap();
            self.calls
                .borrow_mut()
                .push((invocation.step, invocation.working_dir.to_path_buf()));
            Ok(self.exit_code)
        }
    }

    fn package_with_script(root: &Path, stem: &str) -> PathBuf {
        let location = root.join("lib").join("demo");
        fs::create_dir_all(location.join("tools")).unwrap();
        fs::write(location.join("tools").join(format!("{stem}.sh")), "exit 0").unwrap();
        location
    }

    #[test]
    fn test_parse_steps() {
        assert_eq!("install".parse::<LifecycleStep>().unwrap(), LifecycleStep::Install);
        assert_eq!(
            "before-modify".parse::<LifecycleStep>().unwrap(),
            LifecycleStep::BeforeModify
        );
        assert!(matches!(
            "reinstall".parse::<LifecycleStep>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unknown_step_never_reaches_host() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = InstallContext::new(temp.path());
        let location = package_with_script(temp.path(), "chocolateyInstall");
        let runner = LifecycleScriptRunner::new(&ctx, RecordingHost::new(0), "sh");

        let result = runner.run_named("upgrade", "demo", "1.0.0", &location);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(runner.host().calls.borrow().is_empty());
    }

    #[test]
    fn test_missing_script_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = InstallContext::new(temp.path());
        let location = package_with_script(temp.path(), "chocolateyInstall");
        let runner = LifecycleScriptRunner::new(&ctx, RecordingHost::new(0), "sh");

        assert!(!runner.run(LifecycleStep::Uninstall, "demo", "1.0.0", &location).unwrap());
        assert!(runner.run(LifecycleStep::Install, "demo", "1.0.0", &location).unwrap());
    }

    #[test]
    fn test_temp_dir_removed_after_step() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = InstallContext::new(temp.path());
        let location = package_with_script(temp.path(), "chocolateyInstall");
        let runner = LifecycleScriptRunner::new(&ctx, RecordingHost::new(0), "sh");

        runner.run(LifecycleStep::Install, "demo", "1.0.0", &location).unwrap();
        let calls = runner.host().calls.borrow();
        assert_eq!(calls[0].1, ctx.script_temp_dir());
        assert!(!calls[0].1.exists());
    }

    #[test]
    fn test_keep_temp_uses_diagnostics_dir() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = InstallContext::new(temp.path());
        let location = package_with_script(temp.path(), "chocolateyInstall");
        let runner = LifecycleScriptRunner::new(&ctx, RecordingHost::new(0), "sh").keep_temp(true);

        runner.run(LifecycleStep::Install, "demo", "1.0.0", &location).unwrap();
        runner.run(LifecycleStep::Install, "other", "2.0.0", &location).unwrap();

        let kept = ctx.script_diagnostics_dir();
        let step = LifecycleStep::Install.to_string();
        assert_eq!(
            fs::read_to_string(kept.join("demo.1.0.0").join(&step).join("trace.log")).unwrap(),
            "demo"
        );
        assert_eq!(
            fs::read_to_string(kept.join("other.2.0.0").join(&step).join("trace.log")).unwrap(),
            "other"
        );
    }

    #[test]
    fn test_nonzero_exit_is_script_error() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = InstallContext::new(temp.path());
        let location = package_with_script(temp.path(), "chocolateyUninstall");
        let runner = LifecycleScriptRunner::new(&ctx, RecordingHost::new(3), "sh");

        let err = runner
            .run(LifecycleStep::Uninstall, "demo", "1.0.0", &location)
            .unwrap_err();
        assert!(matches!(err, Error::Script { ref step, .. } if step == "uninstall"));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_host_runs_shell_script() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = InstallContext::new(temp.path());
        let location = temp.path().join("lib").join("demo");
        fs::create_dir_all(location.join("tools")).unwrap();
        fs::write(
            location.join("tools").join("chocolateyInstall.sh"),
            "echo \"$ChocolateyPackageName\" > \"$ChocolateyPackageFolder/installed.txt\"\n",
        )
        .unwrap();

        let host = ProcessScriptHost::new(ScriptHostSettings::default(), Duration::from_secs(30));
        let runner = LifecycleScriptRunner::new(&ctx, host, "sh");
        runner.run(LifecycleStep::Install, "demo", "1.0.0", &location).unwrap();

        assert_eq!(fs::read_to_string(location.join("installed.txt")).unwrap().trim(), "demo");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_host_timeout() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = InstallContext::new(temp.path());
        let location = temp.path().join("lib").join("slow");
        fs::create_dir_all(location.join("tools")).unwrap();
        fs::write(location.join("tools").join("chocolateyInstall.sh"), "sleep 5\n").unwrap();

        let host = ProcessScriptHost::new(ScriptHostSettings::default(), Duration::from_millis(200));
        let runner = LifecycleScriptRunner::new(&ctx, host, "sh");
        let err = runner
            .run(LifecycleStep::Install, "slow", "1.0.0", &location)
            .unwrap_err();
        assert!(matches!(err, Error::Script { .. }));
    }
}
