use clap::{Args, Parser};
use std::path::PathBuf;
use std::process;

mod app;
mod config;
mod telemetry;

#[derive(Parser)]
#[command(name = "meshrelay", about = "Relays Meshtastic MQTT traffic to Discord")]
enum CliCommand {
    /// Run the ingestion pipeline
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config_file: PathBuf,
}

fn main() {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Run(args) => run(args),
    }
}

fn run(args: RunArgs) {
    let config = match config::Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", args.config_file.display());
            process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("{}: {e}", args.config_file.display());
        process::exit(1);
    }

    let instance_id = format!("{:08x}", rand::random::<u32>());
    let sentry_guard = telemetry::init_logging(config.logging.as_ref(), &instance_id);
    tracing::info!(%instance_id, "starting meshrelay");

    if let Err(e) = start(config, instance_id) {
        tracing::error!("{e}");
        // flush pending Sentry events before exiting
        drop(sentry_guard);
        process::exit(1);
    }
}

#[derive(thiserror::Error, Debug)]
enum StartError {
    #[error(transparent)]
    Metrics(#[from] telemetry::MetricsInitError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Run(#[from] app::RunError),
}

fn start(config: config::Config, instance_id: String) -> Result<(), StartError> {
    if let Some(metrics) = &config.metrics {
        telemetry::init_metrics(metrics)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(app::run(config, instance_id))?;
    Ok(())
}
