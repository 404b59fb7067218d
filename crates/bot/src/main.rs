//! Bot entry point.

use std::process::ExitCode;

use bot::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cafe-bot: {e}");
            return ExitCode::FAILURE;
        }
    };

    bot::init_tracing(&config);
    tracing::info!(?config, "Starting café bot");

    match bot::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Bot stopped with an error");
            ExitCode::FAILURE
        }
    }
}
