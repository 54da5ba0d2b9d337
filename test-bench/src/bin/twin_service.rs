//! Digital twin service.
//!
//! Runs the twin's synchronisation loop on an in-process bus, together with
//! an emulated physical bench unless `--no-emulator` is given.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use proto_control::{topics, BenchCommand};
use shared::config_storage::ConfigStorage;
use shared::messaging::{publish_json, ChannelBus, MessageBus};
use simulator::emulator::PhysicalTwinEmulator;
use simulator::structure::bench_frame;
use test_bench::cli::ServiceArgs;
use test_bench::emulation::EmulatorService;
use test_bench::{SyncLoop, TwinConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Digital twin of the hybrid test bench")]
struct Args {
    #[command(flatten)]
    service: ServiceArgs,

    #[arg(long, help = "Start with excitation off and wait for an operator command")]
    idle: bool,

    #[arg(long, help = "Do not run the emulated physical bench")]
    no_emulator: bool,

    #[arg(long, help = "Write the effective configuration back to storage")]
    save_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let storage = match &args.service.config_dir {
        Some(path) => ConfigStorage::with_path(path.clone()),
        None => ConfigStorage::new().context("Failed to initialize config storage")?,
    };
    let mut config = TwinConfig::load(&storage).context("Failed to load twin configuration")?;
    if let Some(interval) = &args.service.interval {
        info!("Tick period overridden to {}", interval);
        config.execution_interval = interval.0.as_secs_f64();
    }
    config.validate().context("Invalid twin configuration")?;
    if args.save_config {
        let path = config.save(&storage).context("Failed to save twin configuration")?;
        info!("Saved configuration to {}", path.display());
    }

    let bus: Arc<dyn MessageBus> = Arc::new(ChannelBus::new());
    let shutdown = Arc::new(AtomicBool::new(false));
    let period = Duration::from_secs_f64(config.execution_interval);
    let max_ticks = args.service.ticks;

    let model = bench_frame(config.initial_specimen_modulus)
        .context("Failed to build the bench model")?;
    let mut twin = SyncLoop::new(config.clone(), model, bus.clone())
        .context("Failed to set up the twin")?;

    if args.idle {
        info!("Waiting for an excitation command on {}", topics::COMMANDS);
    } else {
        let on = BenchCommand::excitation(true);
        publish_json(bus.as_ref(), topics::COMMANDS, &on)?;
        publish_json(bus.as_ref(), topics::PHYSICAL_COMMANDS, &on)?;
    }

    let emulator = if args.no_emulator {
        warn!(
            "No emulator: expecting bench readings on {}",
            topics::OBSERVATIONS
        );
        None
    } else {
        let emulator = PhysicalTwinEmulator::new(&config.emulator, config.execution_interval)
            .context("Failed to set up the bench emulator")?;
        let mut service = EmulatorService::new(emulator, bus.clone());
        let flag = shutdown.clone();
        info!("Emulated bench running every {:.3}s", config.execution_interval);
        Some(tokio::task::spawn_blocking(move || {
            service.run(period, &flag, max_ticks)
        }))
    };

    let ctrl_c_flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            ctrl_c_flag.store(true, Ordering::Relaxed);
        }
    });

    let twin_flag = shutdown.clone();
    let summary = tokio::task::spawn_blocking(move || twin.run(&twin_flag, max_ticks))
        .await
        .context("Twin loop panicked")?;
    shutdown.store(true, Ordering::Relaxed);

    if let Some(handle) = emulator {
        let emulated = handle.await.context("Emulator loop panicked")?;
        info!(
            "Emulator stopped after {} ticks ({} errors)",
            emulated.ticks, emulated.errors
        );
    }

    info!(
        "Twin stopped after {} ticks ({} overruns, {} errors)",
        summary.ticks, summary.overruns, summary.errors
    );
    Ok(())
}
