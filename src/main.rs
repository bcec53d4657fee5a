use std::process::ExitCode;

use tracing::{error, info};

use webapp_api::config::Config;
use webapp_api::{logging, server};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // The subscriber depends on the config, so this goes straight to stderr
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init(config.app_env.logging_profile());
    info!(config = ?config.summary(), "Loaded configuration");

    match server::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
