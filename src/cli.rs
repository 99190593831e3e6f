use crate::{
    discover_pages, normalize_extension, validate_config, ChromeLauncher, Config, ContentHost,
    RunSummary, Scheduler, WebsnapError,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "websnap")]
#[command(about = "Render every page of a static site under several device profiles")]
#[command(version)]
pub struct Cli {
    #[arg(short, long, help = "Content root to serve and render")]
    pub www: PathBuf,

    #[arg(short, long, help = "Output directory for rendered artifacts")]
    pub output: PathBuf,

    #[arg(
        short = 'N',
        long,
        alias = "maxConcurrency",
        help = "Number of pages rendered at the same time [default: 4]"
    )]
    pub max_concurrency: Option<usize>,

    #[arg(
        short = 'P',
        long,
        alias = "basePort",
        help = "First port tried for the local content server [default: 8080]"
    )]
    pub base_port: Option<u16>,

    #[arg(
        short,
        long,
        help = "Artifact extension: .png, .jpg, .jpeg or .webp [default: .png]"
    )]
    pub extension: Option<String>,

    #[arg(short, long, help = "Media type emulated on every page [default: websnap]")]
    pub media: Option<String>,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(
        long = "device",
        value_name = "ALIAS",
        help = "Only render with this device profile (repeatable)"
    )]
    pub devices: Vec<String>,

    #[arg(long, help = "Navigation timeout in seconds [default: 30]")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

/// Build the run configuration: config file (or defaults), then command-line
/// overrides, then validation.
pub async fn load_config(args: &Cli) -> Result<Config, WebsnapError> {
    let mut config = if let Some(config_path) = &args.config {
        let config_content = tokio::fs::read_to_string(config_path).await.map_err(|e| {
            WebsnapError::Configuration(format!("cannot read {}: {e}", config_path.display()))
        })?;
        serde_json::from_str(&config_content)?
    } else {
        Config::default()
    };

    if let Some(max_concurrency) = args.max_concurrency {
        config.max_concurrency = max_concurrency;
    }
    if let Some(base_port) = args.base_port {
        config.base_port = base_port;
    }
    if let Some(extension) = &args.extension {
        config.extension = extension.clone();
    }
    if let Some(media) = &args.media {
        config.media = media.clone();
    }
    if let Some(timeout) = args.timeout {
        config.wait_policy.timeout = Duration::from_secs(timeout);
    }
    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }

    config.extension = normalize_extension(&config.extension);

    if !args.devices.is_empty() {
        config.devices = config.devices.select(&args.devices).map_err(|alias| {
            WebsnapError::Configuration(format!(
                "unknown device {alias:?} (available: {})",
                config.devices.aliases().join(", ")
            ))
        })?;
    }

    validate_config(&config)?;

    info!("Max concurrency: {}", config.max_concurrency);
    info!("Devices: {}", config.devices.aliases().join(", "));

    Ok(config)
}

pub struct CliRunner {
    pub config: Config,
    pub www: PathBuf,
    pub output: PathBuf,
}

impl CliRunner {
    pub fn new(config: Config, args: &Cli) -> Result<Self, WebsnapError> {
        let output = std::path::absolute(&args.output)?;

        Ok(Self {
            config,
            www: args.www.clone(),
            output,
        })
    }

    /// Discover pages, serve them, render every page with every device and
    /// stop the server once the render pool is torn down.
    pub async fn run(&self) -> Result<RunSummary, WebsnapError> {
        let pages = discover_pages(&self.www, &self.config.page_extension)?;
        info!("Found {} pages under {}", pages.len(), self.www.display());

        let host = ContentHost::start(&self.www, self.config.base_port).await?;

        let scheduler = Scheduler::new(self.config.clone(), &self.output);
        let result = scheduler
            .run(&pages, host.base_url(), ChromeLauncher::new(self.config.clone()))
            .await;

        if let Err(e) = host.shutdown().await {
            warn!("Local server did not stop cleanly: {}", e);
        }

        result
    }
}

pub fn setup_logging(verbose: bool) -> Result<(), WebsnapError> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| WebsnapError::Configuration(format!("logging already initialised: {e}")))
}
