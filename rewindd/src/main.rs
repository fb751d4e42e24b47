//! Rewind daemon - headless training runner
//!
//! Drives a learning session with the same pacing as the interactive game
//! (tick delay, pause after a rewind, win/loss delays) and writes a JSON
//! episode report when it stops.
//!
//! Storage locations:
//! - Settings: <config dir>/rewind/config.json (or `--config <path>`)
//! - Report:   <data dir>/rewind/report.json
//!
//! Flags: `--config <path>`, `--episodes N`, `--seed S`,
//! `--mode training|inference|test`, `--unpaced`.

use std::fs;
use std::path::PathBuf;

use rewind::agent::Mode;
use tracing::{info, warn};

mod paths;
mod runner;
mod settings;

use paths::AppPaths;
use settings::RunnerSettings;

fn arg_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let paths = AppPaths::new()?;
    info!("Data directory: {:?}", paths.data_dir());

    let mut settings = match arg_value(&args, "--config") {
        Some(path) => RunnerSettings::load(&PathBuf::from(path))?,
        None => {
            let path = paths.config_file();
            let s = RunnerSettings::load_or_default(&path)?;
            info!("Settings: {:?}", path);
            s
        }
    };
    if let Some(n) = arg_value(&args, "--episodes") {
        settings.max_episodes = Some(n.parse()?);
    }
    if let Some(seed) = arg_value(&args, "--seed") {
        settings.seed = seed.parse()?;
    }
    if let Some(mode) = arg_value(&args, "--mode") {
        settings.mode = Mode::from_name(&mode).ok_or_else(|| format!("unknown mode: {mode}"))?;
    }
    if args.iter().any(|a| a == "--unpaced") {
        settings.paced = false;
    }
    settings.validate()?;

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Ctrl-C handler unavailable; runner only stops on its own limits");
            std::future::pending::<()>().await;
        }
        info!("Ctrl-C: stopping after the current tick");
    };

    let report = runner::run(settings, shutdown).await?;

    let path = paths.report_file();
    fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    info!("Report written to {:?}", path);
    Ok(())
}
