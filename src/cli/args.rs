//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Ownership and permission enforcement daemon
#[derive(Parser, Debug)]
#[command(
    name = "ownkeeper",
    version = env!("CARGO_PKG_VERSION"),
    about = "Keep directory trees on a declared owner and mode",
    long_about = "Watch configured directories and continuously correct file ownership and permissions.",
    after_help = "Examples:\n  ownkeeper --config /config/config.yaml run\n  ownkeeper check --dry-run\n  FOLDERS=/data/media:1000:1000:0755 ownkeeper",
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to the YAML configuration file (defaults to $CONFIG_FILE)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Watch and enforce until SIGINT/SIGTERM (default)
    Run,

    /// Run one enforcement pass over every folder and report
    Check {
        /// Report drift without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

impl Cli {
    /// The selected command, `run` when none was given.
    pub fn selected(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }
}
