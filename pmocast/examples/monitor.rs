//! Watch one Cast device and print its state changes
//!
//! Usage:
//!   cargo run --example monitor -- <device-name> [interface] [idle-timeout-ms]
//!
//! Runs until interrupted. `RUST_LOG` overrides the log level from the
//! configuration file.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use pmocast::{MonitorConfig, MonitorEvent, MonitorHandle};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <device-name> [interface] [idle-timeout-ms]", args[0]);
        eprintln!("\nExample:");
        eprintln!("  {} Garage eth0 120000", args[0]);
        std::process::exit(1);
    }

    let settings = pmoconfig::get_config();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            settings
                .get_log_min_level()
                .unwrap_or_default()
                .to_lowercase(),
        )
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = MonitorConfig::from_config(&settings)?;
    config.device_name = args[1].clone();
    if let Some(interface) = args.get(2).filter(|name| !name.is_empty()) {
        config = config.with_interface(interface.as_str());
    }
    if let Some(timeout) = args.get(3) {
        let millis = timeout
            .parse::<u64>()
            .context("idle timeout must be a number of milliseconds")?;
        config = config.with_idle_timeout(Duration::from_millis(millis));
    }

    println!("→ Watching \"{}\"", config.device_name);
    let mut handle = MonitorHandle::spawn(config)?;
    let events = handle.subscribe();

    for event in events.iter() {
        match event {
            MonitorEvent::PowerState(power) => println!("powerState {power}"),
            MonitorEvent::PlayState(play) => println!("playState {play}"),
            MonitorEvent::Application(app) => println!("application {app}"),
            MonitorEvent::Media(media) => println!("media {} - {}", media.artist, media.title),
        }
    }

    handle.shutdown();
    Ok(())
}
