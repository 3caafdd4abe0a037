//! Config command.

use crate::config::Settings;

/// Print the effective configuration.
pub fn run(settings: &Settings) -> anyhow::Result<()> {
    let rendered = toml::to_string_pretty(settings)?;
    println!("# Effective configuration");
    println!("{rendered}");
    Ok(())
}
