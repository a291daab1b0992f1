//! Device telemetry command handlers.

use std::io;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;

use crate::core::telemetry::{DeviceRegistry, DeviceSelector, Telemetry};
use crate::core::Config;
use crate::platform::nvml::Nvml;
use crate::ui::device_formatters;

/// Open NVML from the configured path, or the platform defaults
pub fn open_nvml(config: &Config) -> Result<Nvml> {
    let nvml = match &config.nvml_library {
        Some(path) => Nvml::load(path),
        None => Nvml::load_default(),
    }
    .context("Failed to load the NVIDIA management library")?;

    log::debug!("Using NVML from {:?}", nvml.library_path());
    Ok(nvml)
}

fn selector(matches: &ArgMatches) -> DeviceSelector {
    matches
        .get_one::<i64>("index")
        .copied()
        .map(DeviceSelector::from_signed)
        .unwrap_or(DeviceSelector::All)
}

/// Execute the devices command
pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;
    let nvml = open_nvml(&config)?;
    let selector = selector(matches);

    let mut registry = DeviceRegistry::new(&nvml);
    registry.refresh();
    let snapshots = registry.selected(selector)?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(snapshots)?);
        return Ok(());
    }

    let driver = nvml.driver_version().ok();
    let library = nvml.library_version().ok();
    device_formatters::format_versions(driver.as_deref(), library.as_deref());
    device_formatters::format_device_snapshots(snapshots, |pid| nvml.process_name(pid).ok());
    println!();

    Ok(())
}

/// Execute the watch command: refresh and print one line per device
pub fn execute_watch(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;
    let nvml = open_nvml(&config)?;
    let selector = selector(matches);

    let interval = matches
        .get_one::<u64>("interval")
        .copied()
        .unwrap_or(config.watch_interval_ms);
    let count = matches.get_one::<u64>("count").copied();

    let mut registry = DeviceRegistry::new(&nvml);
    let stdout = io::stdout();
    let mut round: u64 = 0;

    loop {
        match selector {
            DeviceSelector::All => registry.refresh(),
            DeviceSelector::Index(index) => {
                registry.refresh_device(index)?;
            }
        }

        let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
        println!("{}", stamp.dimmed());
        registry.display(selector, &mut stdout.lock())?;

        round += 1;
        if count.is_some_and(|c| round >= c) {
            break;
        }
        thread::sleep(Duration::from_millis(interval));
    }

    Ok(())
}

/// Execute the capabilities command
pub fn execute_capabilities(_matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;
    let nvml = open_nvml(&config)?;

    device_formatters::format_capabilities(
        &format!("NVML ({})", nvml.library_path().display()),
        nvml.capabilities(),
    );

    let missing: Vec<&str> = nvml.capabilities().missing().collect();
    if !missing.is_empty() {
        println!(
            "\n{} {}",
            "Unavailable with this driver:".yellow(),
            missing.join(", ")
        );
    }
    println!();

    Ok(())
}
