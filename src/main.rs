use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pricewatch_lib::application::{BatchRunner, PricePipeline};
use pricewatch_lib::infrastructure::http_client::DocumentFetcher;
use pricewatch_lib::infrastructure::logging::{init_logging_with_config, log_system_info};
use pricewatch_lib::infrastructure::{
    AppConfig, ConfigManager, ExtractionMode, HttpClient, SessionFactory, SiteConfig, StaticSessionFactory,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Live,
    Static,
}

impl From<ModeArg> for ExtractionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Live => Self::Live,
            ModeArg::Static => Self::Static,
        }
    }
}

/// Extract product prices from the configured e-commerce pages
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (JSON or TOML); defaults to the per-user config
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Only process the site with this name, even if it is disabled
    #[arg(short, long)]
    site: Option<String>,

    /// Force every site through one extraction path
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Write the JSON report here
    #[arg(short, long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Log level override
    #[arg(short, long)]
    log_level: Option<String>,
}

async fn load_config(cli: &Cli) -> Result<AppConfig> {
    match &cli.config {
        Some(path) => ConfigManager::with_path(path).load_config(),
        None => ConfigManager::new()?.initialize_on_first_run().await,
    }
}

fn select_sites(config: &AppConfig, cli: &Cli) -> Vec<SiteConfig> {
    let selected: Vec<&SiteConfig> = match &cli.site {
        Some(name) => config.sites.iter().filter(|s| s.name == *name).collect(),
        None => config.enabled_sites().collect(),
    };

    selected
        .into_iter()
        .cloned()
        .map(|mut site| {
            if let Some(mode) = cli.mode {
                site.mode = mode.into();
            }
            site
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli).await?;
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    init_logging_with_config(config.logging.clone())?;
    log_system_info();

    let sites = select_sites(&config, &cli);
    if sites.is_empty() {
        warn!("No sites selected; enable a site in the configuration or pass --site");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let fetcher: Arc<dyn DocumentFetcher> =
        Arc::new(HttpClient::new(config.http.clone()).context("Failed to create HTTP client")?);
    let pipeline = PricePipeline::new(&config, Arc::clone(&fetcher)).context("Invalid extraction configuration")?;
    // No browser driver ships with the binary: live pages run over fetched snapshots
    let sessions: Arc<dyn SessionFactory> =
        Arc::new(StaticSessionFactory::new(fetcher).with_cancellation(cancel.clone()));
    let runner = BatchRunner::new(Arc::new(pipeline), Some(sessions), config.batch.clone());

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current wait and stopping");
            on_signal.cancel();
        }
    });

    info!("Processing {} site(s)", sites.len());
    let report = runner.run(sites, &cancel).await;

    print!("{}", report.render_results());
    print!("{}", report.render_failed_summary());

    if let Some(path) = cli.report.as_ref().or(config.batch.report_path.as_ref()) {
        if let Err(e) = report.write_to(path).await {
            error!("{:#}", e);
            return Err(e);
        }
    }

    Ok(())
}
