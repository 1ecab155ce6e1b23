use crate::checks::{CheckKind, CheckManifest};
use crate::config::settings::HarnessConfig;
use crate::scheduler::Orchestrator;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about = "Grade interactive programs against a check manifest", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every check in a manifest and export the results
    Run {
        /// JSON manifest listing the checks
        #[arg(long)]
        manifest: PathBuf,
        /// Where to write the JUnit XML report
        #[arg(long)]
        report: Option<PathBuf>,
        /// Harness configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Append raw stream bytes of every process under this directory
        #[arg(long)]
        capture_dir: Option<PathBuf>,
        /// Do not echo program output to the console
        #[arg(long)]
        quiet: bool,
    },
    /// Check a manifest and configuration without running anything
    Validate {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(HarnessConfig::default()),
    }
}

fn warn_about_privileges(manifest: &CheckManifest) {
    let wants_user = manifest.checks.iter().any(|check| match &check.kind {
        CheckKind::Command { process, .. } | CheckKind::Scripted { process, .. } => {
            process.user.is_some()
        }
    });
    if wants_user && !nix::unistd::geteuid().is_root() {
        eprintln!("Warning: some checks run as another user, which requires root");
        eprintln!("Those checks will be reported as execution environment errors.");
    }
}

/// Parse arguments, run the requested command and return the process exit
/// code: 0 when every case succeeded, 1 otherwise.
pub fn run() -> Result<i32> {
    env_logger::init();

    if !cfg!(unix) {
        anyhow::bail!("gradebox needs Unix pseudo-terminals and process groups");
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            manifest,
            report,
            config,
            capture_dir,
            quiet,
        } => {
            let mut config = load_config(config.as_deref())?;
            if capture_dir.is_some() {
                config.capture_dir = capture_dir;
            }
            if quiet {
                config.echo_console = false;
            }
            config.validate()?;

            let manifest = CheckManifest::load_from_file(&manifest)
                .with_context(|| format!("loading manifest {}", manifest.display()))?;
            warn_about_privileges(&manifest);

            let mut orchestrator = Orchestrator::new(manifest.suite.clone(), config);
            for unit in manifest.into_units() {
                orchestrator.register_shared(unit)?;
            }
            info!("registered {} checks", orchestrator.len());

            let suite = orchestrator.run();
            if let Some(path) = report {
                orchestrator
                    .export(&path)
                    .with_context(|| format!("writing report {}", path.display()))?;
                println!("Report written to {}", path.display());
            }
            Ok(if suite.all_passed() { 0 } else { 1 })
        }
        Commands::Validate { manifest, config } => {
            load_config(config.as_deref())?;
            let loaded = CheckManifest::load_from_file(&manifest)
                .with_context(|| format!("loading manifest {}", manifest.display()))?;
            warn_about_privileges(&loaded);
            println!(
                "{}: {} checks in suite '{}'",
                manifest.display(),
                loaded.checks.len(),
                loaded.suite
            );
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "gradebox",
            "run",
            "--manifest",
            "checks.json",
            "--report",
            "out.xml",
            "--quiet",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                manifest,
                report,
                quiet,
                config,
                ..
            } => {
                assert_eq!(manifest, PathBuf::from("checks.json"));
                assert_eq!(report, Some(PathBuf::from("out.xml")));
                assert!(quiet);
                assert!(config.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(load_config(Some(Path::new("/definitely/not/here.json"))).is_err());
        assert!(load_config(None).is_ok());
    }
}
