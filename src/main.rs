// src/main.rs

use anyhow::{Context, Result};
use choco::config::{CommandKind, FileConfig, OperationConfig, PinCommand};
use choco::context::InstallContext;
use choco::installed::PackageRegistry;
use choco::orchestrator::Orchestrator;
use choco::packages::{PackageMetadata, SourceKind};
use choco::pin::{self, PinChange};
use choco::results::OperationResults;
use choco::version::PackageVersion;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "choco")]
#[command(author, version, about = "Package manager for archive packages with native registry reconciliation", long_about = None)]
struct Cli {
    /// Install root (default: $ChocolateyInstall or the platform default)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages
    Install(PackageArgs),
    /// Upgrade installed packages (use "all" for every package)
    Upgrade(PackageArgs),
    /// Uninstall packages
    Uninstall(PackageArgs),
    /// List installed packages
    List {
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage package pins
    Pin {
        #[command(subcommand)]
        command: PinCommands,
    },
}

#[derive(Args)]
struct PackageArgs {
    /// Package ids
    #[arg(required = true)]
    names: Vec<String>,
    /// Directory of .nupkg files (repeatable, replaces configured sources)
    #[arg(short, long)]
    source: Vec<PathBuf>,
    /// Exact version to install, upgrade to or uninstall
    #[arg(long)]
    version: Option<String>,
    /// Include prerelease versions
    #[arg(long)]
    prerelease: bool,
    /// Ignore prerelease versions
    #[arg(long)]
    exclude_prerelease: bool,
    /// Reinstall or upgrade even when already installed or pinned
    #[arg(short, long)]
    force: bool,
    #[arg(long)]
    allow_downgrade: bool,
    /// Keep versions side by side in lib/<id>.<version>
    #[arg(short = 'm', long)]
    allow_multiple_versions: bool,
    /// Uninstall every installed version
    #[arg(long)]
    all_versions: bool,
    /// Fail an upgrade when the package is not installed
    #[arg(long)]
    fail_on_not_installed: bool,
    /// Report what would happen without changing anything
    #[arg(short, long)]
    noop: bool,
    #[arg(long)]
    skip_scripts: bool,
    /// Keep script working directories for inspection
    #[arg(long)]
    keep_temp: bool,
    #[arg(long)]
    stop_on_first_failure: bool,
}

#[derive(Subcommand)]
enum PinCommands {
    /// List pinned packages
    List {
        /// Show packages that are not pinned instead
        #[arg(long)]
        unpinned: bool,
    },
    /// Pin a package
    Add(PinArgs),
    /// Remove a pin
    Remove(PinArgs),
}

#[derive(Args)]
struct PinArgs {
    #[arg(short, long)]
    name: String,
    #[arg(long)]
    version: Option<String>,
    /// Target a native registry entry instead of an archive package
    #[arg(long)]
    native: bool,
}

fn default_root() -> PathBuf {
    if let Some(root) = std::env::var_os("ChocolateyInstall") {
        return PathBuf::from(root);
    }
    if cfg!(windows) {
        PathBuf::from(r"C:\ProgramData\chocolatey")
    } else {
        PathBuf::from("/opt/chocolatey")
    }
}

fn parse_version(version: Option<&str>) -> Result<Option<PackageVersion>> {
    version
        .map(|v| PackageVersion::parse(v).with_context(|| format!("Invalid version '{}'", v)))
        .transpose()
}

fn operation_config(command: CommandKind, args: PackageArgs, file: &FileConfig) -> Result<OperationConfig> {
    let mut config = OperationConfig::new(command).with_packages(args.names);
    config.apply_file_config(file);

    if !args.source.is_empty() {
        config.sources = args.source;
    }
    config.version = parse_version(args.version.as_deref())?;
    config.prerelease = args.prerelease;
    config.exclude_prerelease = args.exclude_prerelease;
    config.force = args.force;
    config.allow_downgrade = args.allow_downgrade;
    config.allow_multiple_versions |= args.allow_multiple_versions;
    config.all_versions = args.all_versions;
    config.fail_on_not_installed |= args.fail_on_not_installed;
    config.noop = args.noop;
    config.skip_scripts = args.skip_scripts;
    config.keep_temp |= args.keep_temp;
    config.stop_on_first_failure |= args.stop_on_first_failure;
    Ok(config)
}

fn print_results(verb: &str, results: &OperationResults) {
    for result in results.iter() {
        match &result.version {
            Some(version) => println!("{} v{}", result.id, version),
            None => println!("{}", result.id),
        }
        for message in result.grouped_messages() {
            println!("  [{}] {}", message.severity, message.text);
        }
    }

    println!(
        "\nChoco {} {}/{} package(s).",
        verb,
        results.succeeded(),
        results.len()
    );
    let failures: Vec<_> = results.iter().filter(|r| !r.success()).collect();
    if !failures.is_empty() {
        println!("Failures:");
        for result in failures {
            let reason = result
                .grouped_messages()
                .first()
                .map(|m| m.text.as_str())
                .unwrap_or("unknown failure");
            println!("  - {} - {}", result.id, reason);
        }
    }
}

fn run_operation(ctx: &InstallContext, command: CommandKind, args: PackageArgs, file: &FileConfig) -> Result<bool> {
    let config = operation_config(command, args, file)?;
    let mut ctx = ctx.clone();
    if let Some(cache) = &config.cache_location {
        ctx.set_cache_dir(cache);
    }

    let mut orchestrator = Orchestrator::open(&ctx, &config)?;
    let results = orchestrator.run()?;
    let verb = match command {
        CommandKind::Install => "installed",
        CommandKind::Upgrade => "upgraded",
        _ => "uninstalled",
    };
    print_results(verb, &results);
    Ok(results.all_succeeded())
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let ctx = InstallContext::new(cli.root.unwrap_or_else(default_root));
    let file_config = FileConfig::load(&ctx.config_file())?;

    let succeeded = match cli.command {
        Commands::Install(args) => run_operation(&ctx, CommandKind::Install, args, &file_config)?,
        Commands::Upgrade(args) => run_operation(&ctx, CommandKind::Upgrade, args, &file_config)?,
        Commands::Uninstall(args) => {
            run_operation(&ctx, CommandKind::Uninstall, args, &file_config)?
        }
        Commands::List { json } => {
            ctx.ensure_base_dirs()?;
            let registry = PackageRegistry::open(&ctx)?;
            let packages = registry.list()?;
            for pending in registry.pending_packages()? {
                info!("Pending install left behind in {}", pending.display());
            }

            if json {
                let summaries: Vec<_> = packages.iter().map(|p| p.summary()).collect();
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for package in &packages {
                    let mut line = format!("{} {}", package.id(), package.version());
                    if package.source_kind() == SourceKind::NativeRegistry {
                        line.push_str(" [native]");
                    }
                    if package.is_pinned() {
                        line.push_str(" [pinned]");
                    }
                    println!("{}", line);
                }
                println!("{} packages installed.", packages.len());
            }
            true
        }
        Commands::Pin { command } => {
            ctx.ensure_base_dirs()?;
            let registry = PackageRegistry::open(&ctx)?;
            let (pin_command, args) = match command {
                PinCommands::List { unpinned } => {
                    for package in pin::list_pins(&registry, !unpinned)? {
                        println!("{}|{}", package.id(), package.version());
                    }
                    return Ok(());
                }
                PinCommands::Add(args) => (PinCommand::Add, args),
                PinCommands::Remove(args) => (PinCommand::Remove, args),
            };

            let mut config = OperationConfig::new(CommandKind::Pin).with_packages([args.name]);
            config.pin_command = Some(pin_command);
            config.version = parse_version(args.version.as_deref())?;
            if args.native {
                config.pin_source = SourceKind::NativeRegistry;
            }
            config.validate()?;

            let name = &config.package_names[0];
            let pinned = pin_command == PinCommand::Add;
            match pin::set_pin(&registry, name, config.version.as_ref(), pinned, config.pin_source)? {
                PinChange::Changed => println!(
                    "Successfully {} {}",
                    if pinned { "pinned" } else { "unpinned" },
                    name
                ),
                PinChange::NoChange => println!("Nothing to change. Pin state of {} is already set.", name),
            }
            true
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
