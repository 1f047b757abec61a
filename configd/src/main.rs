mod config;
mod telemetry;

use crate::config::{Config, ConfigError};
use crate::telemetry::TelemetryError;
use clap::{Args, Parser};
use config_api::errors::ServerError;
use config_store::kv::KvError;
use config_store::repository::Repository;
use config_store::{ConfigService, CoreService, Metered, Traced};
use shared::metrics_defs::describe_all;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "configd", about = "Versioned configuration service")]
enum CliCommand {
    /// Serve the configuration API
    Run(ConfigArgs),
    /// Load and check a config file, then exit
    Validate(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("could not connect to kv store: {0}")]
    Kv(#[from] KvError),
    #[error("server error: {0}")]
    Server(#[from] ServerError),
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
}

fn load_config(args: &ConfigArgs) -> Result<Config, ConfigError> {
    let mut config = Config::from_file(&args.config)?;
    config.apply_env(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match &cli {
        CliCommand::Run(args) => load_config(args).map_err(CliError::from).and_then(run),
        CliCommand::Validate(args) => load_config(args)
            .map(|_| println!("{} is valid", args.config.display()))
            .map_err(CliError::from),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("configd: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<(), CliError> {
    let _sentry = telemetry::init_logging(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<(), CliError> {
    let renderer = telemetry::init_metrics(&config.metrics)?;
    describe_all(config_store::metrics_defs::ALL_METRICS);
    describe_all(config_api::metrics_defs::ALL_METRICS);

    if let Some(endpoint) = &config.otlp_endpoint {
        tracing::info!(endpoint, "OTLP endpoint configured; spans are logged locally only");
    }

    let kv = config.kv.build()?;
    let service: Arc<dyn ConfigService> = Arc::new(Metered::new(Traced::new(CoreService::new(
        Repository::new(kv),
    ))));

    tracing::info!(
        service_name = %config.api.service_name,
        host = %config.api.listener.host,
        port = config.api.listener.port,
        "starting configuration service"
    );

    tokio::select! {
        result = config_api::run(config.api, service, renderer) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    Ok(())
}
