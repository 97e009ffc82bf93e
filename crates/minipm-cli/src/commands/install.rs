//! `minipm install` command implementation.

use minipm_core::pkg::{
    InstallReport, InstallSession, InstalledPackage, PackageSpec, PkgError, RegistryClient,
    SessionOptions, TarballFetcher,
};
use minipm_core::Config;
use miette::{miette, IntoDiagnostic, Result};
use serde::Serialize;
use tracing::debug;

/// Error entry for JSON output.
#[derive(Debug, Serialize)]
struct ErrorInfo {
    spec: String,
    code: &'static str,
    message: String,
}

impl ErrorInfo {
    fn new(spec: &str, err: &PkgError) -> Self {
        Self {
            spec: spec.to_string(),
            code: err.code(),
            message: err.message().to_string(),
        }
    }
}

/// Root entry for JSON output.
#[derive(Debug, Serialize)]
struct RootInfo {
    spec: String,
    name: String,
    version: String,
}

/// Install result for JSON output.
#[derive(Serialize)]
struct InstallResult {
    ok: bool,
    roots: Vec<RootInfo>,
    installed: Vec<InstalledPackage>,
    errors: Vec<ErrorInfo>,
}

pub fn run(config: &Config, packages: &[String]) -> Result<()> {
    config.validate().into_diagnostic()?;

    // Invalid tokens fail on their own; the remaining roots still run.
    let parsed: Vec<(&str, Result<PackageSpec, PkgError>)> = packages
        .iter()
        .map(|raw| (raw.as_str(), PackageSpec::parse(raw)))
        .collect();
    let specs: Vec<PackageSpec> = parsed
        .iter()
        .filter_map(|(_, spec)| spec.as_ref().ok().cloned())
        .collect();

    let client = RegistryClient::from_config(config).map_err(|e| miette!("{e}"))?;
    let fetcher = TarballFetcher::new(client.http().clone()).with_timeout(config.timeout());
    let install_root = config.install_root();
    debug!(
        registry = %client.base_url(),
        install_root = %install_root.display(),
        roots = specs.len(),
        "Starting install"
    );

    let mut session = InstallSession::new(client, fetcher, install_root).with_options(
        SessionOptions {
            retries: config.retries,
            ..SessionOptions::default()
        },
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    let report = runtime.block_on(session.install_all(&specs));

    // Report in the order the tokens were given
    let mut roots = Vec::new();
    let mut errors = Vec::new();
    let mut reports = report.roots.iter();
    for (raw, spec) in &parsed {
        let result = match spec {
            Ok(_) => reports.next().map(|root| &root.result),
            Err(e) => {
                errors.push(ErrorInfo::new(raw, e));
                continue;
            }
        };
        match result {
            Some(Ok(resolved)) => roots.push(RootInfo {
                spec: (*raw).to_string(),
                name: resolved.name.clone(),
                version: resolved.version.to_string(),
            }),
            Some(Err(e)) => errors.push(ErrorInfo::new(raw, e)),
            None => {}
        }
    }

    let ok = errors.is_empty();
    if config.json_logs {
        print_json(ok, roots, report, errors)?;
    } else {
        print_human(config.verbosity, &roots, &report, &errors);
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn print_json(
    ok: bool,
    roots: Vec<RootInfo>,
    report: InstallReport,
    errors: Vec<ErrorInfo>,
) -> Result<()> {
    let result = InstallResult {
        ok,
        roots,
        installed: report.packages,
        errors,
    };
    println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);
    Ok(())
}

fn print_human(verbosity: u8, roots: &[RootInfo], report: &InstallReport, errors: &[ErrorInfo]) {
    if verbosity > 0 {
        for pkg in &report.packages {
            match &pkg.previous {
                Some(from) => println!("+ {}@{} (was {from})", pkg.name, pkg.version),
                None => println!("+ {}@{}", pkg.name, pkg.version),
            }
        }
        let stats = report.stats;
        println!(
            "{} fetched, {} already satisfied, {} cycles skipped",
            stats.fetched, stats.satisfied, stats.cycle_skips
        );
    } else {
        for root in roots {
            println!("+ {}@{}", root.name, root.version);
        }
    }

    for err in errors {
        eprintln!("! {}: {} {}", err.spec, err.code, err.message);
    }
}
