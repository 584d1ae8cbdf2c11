use std::panic;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use codegrader::builder::{Builder, PipelineTester};
use codegrader::config::{load_config, BuilderConfig, DispatchConfig};
use codegrader::dispatch::DispatchService;

#[derive(Parser)]
#[command(name = "codegrader", about = "Builds and tests student submissions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatcher that accepts builder connections and queues
    /// submissions.
    Dispatch {
        /// YAML config file; defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run a builder worker that connects to a dispatcher.
    Builder {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    match Cli::parse().command {
        Command::Dispatch { config } => {
            let config: DispatchConfig = match config {
                Some(path) => load_config(&path)?,
                None => DispatchConfig::default(),
            };
            let service = DispatchService::new(config);
            tokio::select! {
                served = service.run() => served?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down dispatcher");
                    service.shutdown();
                }
            }
        }
        Command::Builder { config } => {
            let config: BuilderConfig = match config {
                Some(path) => load_config(&path)?,
                None => BuilderConfig::default(),
            };
            let tester = PipelineTester::new(config.build.clone());
            let mut builder = Builder::new(config, tester);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::select! {
                _ = builder.run(shutdown_rx) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down builder");
                    let _ = shutdown_tx.send(true);
                }
            }
        }
    }

    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
