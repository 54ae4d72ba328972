pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod output;
pub mod providers;
pub mod runner;

use clap::Parser;
use std::env;
use std::io;
use std::process::ExitCode;
use tracing::{info, warn};

use cli::Cli;
use config::RuntimeConfig;
use error::RunError;
use providers::openai_compat::OpenAiCompatBackend;
use runner::run_cli;

pub async fn run() -> ExitCode {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();
    let runtime = RuntimeConfig::from_env();
    info!(
        timeout_secs = ?runtime.timeout_secs,
        openai_base_url = %runtime.openai_base_url,
        "loaded runtime configuration"
    );

    let mut stdout = io::stdout();
    let outcome = run_cli(
        &cli,
        |key| env::var(key).ok(),
        |cfg| OpenAiCompatBackend::connect(cfg, &runtime).map_err(RunError::ProviderRequestFailed),
        &mut stdout,
    )
    .await;

    match outcome {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            warn!(exit_code = err.exit_code(), "chat request aborted");
            eprintln!("chatping: {}", err);
            ExitCode::from(err.exit_code())
        }
    }
}
