pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod processor;
pub mod registry;
pub mod writer;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use crate::config::Config;
use crate::error::ConvertError;
use crate::processor::Converter;
use crate::registry::Registry;

pub fn run() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    // 1. ── Configure ──────────────────────────────────────────────────
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    args.apply(&mut config);

    // 2. ── Load registry ──────────────────────────────────────────────
    let mut registry = Registry::load(&config.registry_path)
        .with_context(|| format!("Loading {}", config.registry_path.display()))?;

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Creating {}", args.output.display()))?;

    // 3. ── Convert ────────────────────────────────────────────────────
    let mut converter = Converter::new(config, &mut registry);
    let mut failed = 0;
    for input in &args.inputs {
        match converter.convert_file(input, &args.output) {
            Ok(summary) => {
                for warning in &summary.warnings {
                    println!("  warning: {warning}");
                }
                println!(
                    "{} -> {} ({} procedures, {} includes, {} warnings)",
                    input.display(),
                    summary.output_path.display(),
                    summary.generated_procedure_count,
                    summary.include_count,
                    summary.warnings.len()
                );
            }
            // registry failures leave no trustworthy state to continue from
            Err(e @ ConvertError::Registry(_)) => {
                return Err(e).with_context(|| format!("Converting {}", input.display()));
            }
            Err(e) => {
                error!("{}: {e}", input.display());
                failed += 1;
            }
        }
    }

    info!(
        "{} of {} scripts converted",
        args.inputs.len() - failed,
        args.inputs.len()
    );
    if failed > 0 {
        anyhow::bail!("{failed} script(s) failed to convert");
    }
    Ok(())
}
