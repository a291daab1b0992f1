use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;

use crate::core::Config;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", _)) => show(),
        Some(("set", sub_matches)) => set(sub_matches),
        Some(("reset", _)) => reset(),
        _ => {
            println!("Use 'gpuperf config --help' for more information.");
            Ok(())
        }
    }
}

fn show() -> Result<()> {
    let path = Config::get_config_path()?;
    let config = Config::load()?;

    println!("{} {}", "Config file:".white(), path.display().to_string().cyan());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn set(matches: &ArgMatches) -> Result<()> {
    let key = matches
        .get_one::<String>("key")
        .context("Key argument is required")?;
    let value = matches
        .get_one::<String>("value")
        .context("Value argument is required")?;

    // Environment overrides are not persisted.
    let path = Config::get_config_path()?;
    let mut config = Config::load_from(&path)?;
    config.set(key, value)?;
    config.save_to(&path)?;

    println!("{} {} = {}", "✓".green(), key, value.cyan());
    Ok(())
}

fn reset() -> Result<()> {
    Config::default().save()?;
    println!("{}", "✓ Configuration reset to defaults".green());
    Ok(())
}
