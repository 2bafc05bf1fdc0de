// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

mod collaborators;
mod config;

use anyhow::{Context, Result};
use fluxion_dispatch::{DispatchOrchestrator, SqliteDecisionStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use collaborators::{CsvForecastSource, SimulatedPlant, SimulatedRegistry};
use config::AppConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    println!("FluxION - Energy dispatch");
    println!("Version: {VERSION}");
    println!();
    println!("Usage: fluxion [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <FILE>  Load configuration from FILE (TOML or JSON)");
    println!("  -h, --help           Print this help message");
    println!("  -v, --version        Print version");
}

fn main() -> Result<()> {
    // Handle command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("{VERSION}");
                return Ok(());
            }
            "--config" | "-c" => {
                let path = rest.next().context("--config requires a file path")?;
                config_path = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("Unknown argument '{other}', see --help"),
        }
    }

    // Initialize tracing with env filter support
    // Respects RUST_LOG environment variable
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting default subscriber failed")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(config_path))
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    config.validate()?;

    let dispatch = &config.dispatch;
    info!("🚀 Starting FluxION dispatch {VERSION}");
    info!("📋 Configuration Summary:");
    info!(
        "   Battery: {} kWh, SOC {}-{}",
        dispatch.battery.capacity_kwh, dispatch.battery.min_soc, dispatch.battery.max_soc
    );
    info!(
        "   Horizon: {} slots x {} min",
        dispatch.planner.horizon_slots, dispatch.planner.slot_minutes
    );
    info!(
        "   Budget limit: {} kW, devices: {}",
        dispatch.budget.configured_limit_kw,
        config.simulation.devices.len()
    );
    info!(
        "   Loops: fast {}s, slow {}s",
        dispatch.scheduler.fast_interval_secs, dispatch.scheduler.slow_interval_secs
    );
    info!("   Debug mode: {}", dispatch.scheduler.debug_mode);

    let store = Arc::new(
        SqliteDecisionStore::open(&config.storage.database_path).with_context(|| {
            format!(
                "Failed to open decision store {}",
                config.storage.database_path.display()
            )
        })?,
    );
    info!(
        "💾 Decision store: {}",
        config.storage.database_path.display()
    );

    let forecast = Arc::new(CsvForecastSource::new(&config.forecast.csv_path));
    let plant = Arc::new(SimulatedPlant::new(&config.simulation));
    let registry = Arc::new(SimulatedRegistry::new(&config.simulation.devices));
    info!("📈 Forecast source: {}", config.forecast.csv_path.display());

    let orchestrator = Arc::new(DispatchOrchestrator::new(
        config.dispatch.clone(),
        forecast,
        plant,
        registry,
        store,
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("🛑 Ctrl-C received, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {e}"),
        }
        let _ = shutdown_tx.send(true);
    });

    orchestrator.run(shutdown_rx).await?;
    Ok(())
}
