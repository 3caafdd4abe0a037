use std::process::ExitCode;

use clap::Parser;
use ownkeeper::cli::{Cli, Commands, commands};
use ownkeeper::{Settings, logging};

/// Exit code for configuration errors.
const CONFIG_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(CONFIG_ERROR);
        }
    };

    logging::init_with_config(&settings.log_level, &settings.logging);

    let outcome = match cli.selected() {
        Commands::Run => commands::run::run(&settings).await,
        Commands::Check { dry_run } => commands::check::run(&settings, dry_run).await,
        Commands::Config => commands::config::run(&settings).map(|()| true),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
