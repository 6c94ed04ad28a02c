//! Tessera - multi-identity pixel placer
//!
//! ```text
//! tessera run [--config tessera.toml]
//! tessera check-targets [--config tessera.toml]
//! ```

mod logging;
mod settings;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use settings::Settings;
use std::path::PathBuf;
use std::process::ExitCode;
use tessera_canvas::{TargetSet, UnknownColor};
use tessera_core::Placer;

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .help("Path to the TOML configuration file")
        .value_parser(value_parser!(PathBuf))
}

fn cli() -> Command {
    Command::new("tessera")
        .version(tessera_core::VERSION)
        .about("Keeps shared canvases matching a set of target images")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Log in every identity and start placing")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("check-targets")
                .about("Load the target images and report unknown colors")
                .arg(config_arg()),
        )
}

fn load_settings(matches: &ArgMatches) -> Result<Settings> {
    let path = matches.get_one::<PathBuf>("config");
    Settings::load(path.map(PathBuf::as_path))
}

fn load_targets(settings: &Settings) -> Result<(TargetSet, Vec<UnknownColor>)> {
    let dir = &settings.placer.targets_dir;
    TargetSet::load_dir(dir, settings.placer.canvas_count)
        .with_context(|| format!("failed to load targets from {}", dir.display()))
}

async fn run(settings: Settings) -> Result<()> {
    let credentials = settings.credentials()?;
    let (targets, unknown) = load_targets(&settings)?;
    for pixel in &unknown {
        tracing::warn!(%pixel, "ignoring target pixel");
    }
    tracing::info!(
        identities = credentials.len(),
        canvases = targets.len(),
        "starting placer"
    );

    let services = tessera_client::services(settings.endpoints)
        .context("failed to build network clients")?;
    let placer = Placer::start(settings.placer, targets, credentials, services)
        .await
        .context("failed to start placer")?;

    placer
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

fn check_targets(settings: &Settings) -> Result<bool> {
    let (targets, unknown) = load_targets(settings)?;
    let expected = settings.placer.dimensions();
    let mut misshapen = 0;
    for target in targets.iter() {
        let (width, height) = target.dimensions();
        println!(
            "canvas {}: {width}x{height}, {} pixels required",
            target.canvas(),
            target.required_count()
        );
        if (width, height) != expected {
            println!(
                "canvas {}: expected {}x{}",
                target.canvas(),
                expected.0,
                expected.1
            );
            misshapen += 1;
        }
    }
    for pixel in &unknown {
        println!("{pixel}");
    }
    Ok(unknown.is_empty() && misshapen == 0)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => {
            let settings = load_settings(sub)?;
            logging::init(&settings.logging);
            run(settings).await?;
            Ok(ExitCode::SUCCESS)
        }
        Some(("check-targets", sub)) => {
            let settings = load_settings(sub)?;
            if check_targets(&settings)? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        _ => unreachable!("subcommand_required"),
    }
}
