#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::needless_pass_by_value)]

mod commands;
mod logging;

use clap::{CommandFactory, Parser};
use minipm_core::Config;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "minipm")]
#[command(author, version, about = "A minimal npm-style package installer", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Registry base URL
    #[arg(long, global = true, value_name = "URL", env = "MINIPM_REGISTRY")]
    registry: Option<String>,

    /// Install directory, relative to the working directory
    #[arg(long, global = true, value_name = "PATH")]
    install_dir: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Retry a root request this many times after a network error
    #[arg(long, global = true, value_name = "N", default_value_t = 0)]
    retries: u32,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Install packages and their dependencies
    Install {
        /// Packages to install (e.g., "react", "lodash@^4.17.0", "@types/node@20")
        #[arg(value_name = "NAME[@CONSTRAINT]")]
        packages: Vec<String>,
    },
}

/// Print usage to stderr and exit non-zero.
fn usage_error(subcommand: Option<&str>) -> ! {
    let mut cmd = Cli::command();
    cmd.build();
    let usage = subcommand
        .and_then(|name| cmd.find_subcommand_mut(name))
        .map(clap::Command::render_usage);
    let usage = usage.unwrap_or_else(|| cmd.render_usage());
    eprintln!("{usage}");
    std::process::exit(1);
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    // Build config
    let mut config = Config::from_env(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json)
        .with_retries(cli.retries);
    if let Some(registry) = cli.registry {
        config = config.with_registry(registry);
    }
    if let Some(dir) = cli.install_dir {
        config = config.with_install_dir(dir);
    }
    if let Some(secs) = cli.timeout {
        config = config.with_timeout_secs(secs);
    }

    match cli.command {
        None => usage_error(None),
        Some(Commands::Version) => commands::version::run(),
        Some(Commands::Install { packages }) => {
            if packages.is_empty() {
                usage_error(Some("install"));
            }
            logging::init(config.verbosity, config.json_logs);
            commands::install::run(&config, &packages)
        }
    }
}
