//! Tula - balance controller daemon for two-wheeled robots
//!
//! Runs the tiered control agent against the configured rig: the
//! built-in simulation by default, bus-attached hardware through the
//! rig traits. Ctrl-C requests a graceful stop; learned parameters are
//! flushed on the way out.

use std::env;
use std::path::Path;
use tula::behavior::Agent;
use tula::error::Error;
use tula::rig::create_rig;
use tula::store::JsonFileStore;
use tula::types::ExternalEvent;
use tula::{AppConfig, Result};

/// Parse config path from command line arguments.
///
/// Supports:
/// - `tula <path>` (positional)
/// - `tula --config <path>` (flag-based)
/// - `tula -c <path>` (short flag)
///
/// Defaults to `/etc/tula.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    // Look for --config or -c flag
    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    // Fall back to first positional argument (if it doesn't start with -)
    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    // Default path
    "/etc/tula.toml".to_string()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Tula v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = parse_config_path();
    let config = if Path::new(&config_path).exists() {
        log::info!("Using config: {}", config_path);
        AppConfig::from_file(&config_path)?
    } else {
        log::info!("No config at {}, using factory defaults", config_path);
        AppConfig::defaults()
    };

    log::info!(
        "Rig: {} ({} Hz reflex, adaptation every {} ticks)",
        config.rig.kind,
        config.control.loop_hz,
        config.control.adaptation_interval
    );

    let (sensors, motors) = create_rig(&config.rig, config.control.loop_time())?;
    let store = JsonFileStore::new(config.rig.store_path.clone());

    // Out-of-band events reach the agent over a channel it drains once
    // per tick; Ctrl-C is just another event
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let ctrlc_tx = event_tx.clone();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        let _ = ctrlc_tx.send(ExternalEvent::Shutdown);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let mut agent = Agent::new(config, sensors, motors, Box::new(store), event_rx)?;
    agent.run()?;

    log::info!("Tula stopped");
    Ok(())
}
