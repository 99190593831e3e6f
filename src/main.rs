use anyhow::Context;
use clap::Parser;
use websnap::{load_config, setup_logging, Cli, CliRunner, RunSummary, WebsnapError};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    setup_logging(args.verbose).context("failed to set up logging")?;

    info!("Starting websnap v{}", env!("CARGO_PKG_VERSION"));

    match run(&args).await {
        Ok(_) => {
            // Failures were logged as their jobs ended and counted by the scheduler
            info!("websnap finished");
            Ok(())
        }
        Err(e) => {
            error!("Application error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: &Cli) -> Result<RunSummary, WebsnapError> {
    let config = load_config(args).await?;
    CliRunner::new(config, args)?.run().await
}
