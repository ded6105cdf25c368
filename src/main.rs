use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use propbridge_lib::io::IoError;
use propbridge_lib::settings::BridgeSettings;

/// TCP bridge for a handshake-bus motor controller and tunneled serial ports
#[derive(Parser, Debug)]
#[command(name = "propbridge", version, about)]
struct Cli {
    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// key=value config file applied over the TOML settings
    #[arg(long)]
    legacy_config: Option<PathBuf>,

    /// Enable debug logging (frame dumps, bus retries)
    #[arg(long)]
    debug: bool,

    /// Also write logs to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn load_settings(cli: &Cli) -> Result<BridgeSettings, IoError> {
    let mut settings = match &cli.config {
        Some(path) => BridgeSettings::load(path)?,
        None => BridgeSettings::default(),
    };
    if let Some(path) = &cli.legacy_config {
        settings.load_legacy_config(path)?;
    }
    if cli.debug {
        settings.logging.debug = true;
    }
    if cli.log_dir.is_some() {
        settings.logging.log_dir = cli.log_dir.clone();
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("propbridge: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match propbridge_lib::run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            propbridge_lib::tlog!("[main] {}", e);
            ExitCode::FAILURE
        }
    }
}
