// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn package_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("names")
            .required(true)
            .num_args(1..)
            .help("Package ids"),
    )
    .arg(
        Arg::new("source")
            .short('s')
            .long("source")
            .action(ArgAction::Append)
            .value_name("DIR")
            .help("Directory of .nupkg files"),
    )
    .arg(Arg::new("version").long("version").help("Exact version"))
    .arg(
        Arg::new("prerelease")
            .long("prerelease")
            .action(ArgAction::SetTrue)
            .help("Include prerelease versions"),
    )
    .arg(
        Arg::new("exclude_prerelease")
            .long("exclude-prerelease")
            .action(ArgAction::SetTrue)
            .help("Ignore prerelease versions"),
    )
    .arg(
        Arg::new("force")
            .short('f')
            .long("force")
            .action(ArgAction::SetTrue)
            .help("Reinstall or upgrade even when already installed or pinned"),
    )
    .arg(
        Arg::new("allow_downgrade")
            .long("allow-downgrade")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("allow_multiple_versions")
            .short('m')
            .long("allow-multiple-versions")
            .action(ArgAction::SetTrue)
            .help("Keep versions side by side"),
    )
    .arg(
        Arg::new("all_versions")
            .long("all-versions")
            .action(ArgAction::SetTrue)
            .help("Uninstall every installed version"),
    )
    .arg(
        Arg::new("fail_on_not_installed")
            .long("fail-on-not-installed")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("noop")
            .short('n')
            .long("noop")
            .action(ArgAction::SetTrue)
            .help("Report what would happen without changing anything"),
    )
    .arg(Arg::new("skip_scripts").long("skip-scripts").action(ArgAction::SetTrue))
    .arg(
        Arg::new("keep_temp")
            .long("keep-temp")
            .action(ArgAction::SetTrue)
            .help("Keep script working directories"),
    )
    .arg(
        Arg::new("stop_on_first_failure")
            .long("stop-on-first-failure")
            .action(ArgAction::SetTrue),
    )
}

fn pin_args(cmd: Command) -> Command {
    cmd.arg(Arg::new("name").short('n').long("name").required(true))
        .arg(Arg::new("version").long("version"))
        .arg(
            Arg::new("native")
                .long("native")
                .action(ArgAction::SetTrue)
                .help("Target a native registry entry"),
        )
}

fn build_cli() -> Command {
    Command::new("choco")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Choco Contributors")
        .about("Package manager for archive packages with native registry reconciliation")
        .subcommand_required(true)
        .arg(
            Arg::new("root")
                .short('r')
                .long("root")
                .global(true)
                .value_name("PATH")
                .help("Install root (default: $ChocolateyInstall)"),
        )
        .subcommand(package_args(Command::new("install").about("Install packages")))
        .subcommand(package_args(
            Command::new("upgrade").about("Upgrade installed packages (use \"all\" for every package)"),
        ))
        .subcommand(package_args(Command::new("uninstall").about("Uninstall packages")))
        .subcommand(
            Command::new("list").about("List installed packages").arg(
                Arg::new("json")
                    .long("json")
                    .action(ArgAction::SetTrue)
                    .help("Print the listing as JSON"),
            ),
        )
        .subcommand(
            Command::new("pin")
                .about("Manage package pins")
                .subcommand_required(true)
                .subcommand(
                    Command::new("list").about("List pinned packages").arg(
                        Arg::new("unpinned")
                            .long("unpinned")
                            .action(ArgAction::SetTrue),
                    ),
                )
                .subcommand(pin_args(Command::new("add").about("Pin a package")))
                .subcommand(pin_args(Command::new("remove").about("Remove a pin"))),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("choco.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
