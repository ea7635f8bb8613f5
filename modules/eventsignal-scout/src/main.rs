use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use eventsignal_common::{load_sites, Config, LoadedSites};
use eventsignal_scout::export::{EventExporter, JsonFileExporter};
use eventsignal_scout::extractors::MethodExtractor;
use eventsignal_scout::fetch::{HttpFetcher, ReqwestFetcher};
use eventsignal_scout::ratelimit::RateLimiter;
use eventsignal_scout::renderer::{BrowserlessRenderer, ChromeRenderer, PageRenderer};
use eventsignal_scout::vision::{ClaudeVision, VisionService};
use eventsignal_scout::Pipeline;

#[derive(Parser)]
#[command(
    name = "eventsignal",
    about = "Collect, normalize and deduplicate community event listings"
)]
struct Cli {
    /// Path to the sites file
    #[arg(long, global = true, env = "EVENTSIGNAL_SITES", default_value = "config/sites.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape every enabled site (default)
    Run {
        /// Skip writing the events file and run log
        #[arg(long)]
        dry_run: bool,
    },
    /// Load the sites file and report problems without scraping
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("eventsignal=info".parse()?);
    if cli.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let sites = load_sites(&cli.config)?;

    match cli.command.unwrap_or(Command::Run { dry_run: false }) {
        Command::Validate => validate(&sites),
        Command::Run { dry_run } => run(sites, dry_run).await,
    }
}

fn validate(sites: &LoadedSites) -> Result<()> {
    for source in &sites.sources {
        println!("ok        {:<40} {}", source.name, source.method_kind());
    }
    for name in &sites.disabled {
        println!("disabled  {name}");
    }
    for issue in &sites.issues {
        println!("invalid   {issue}");
    }

    if !sites.issues.is_empty() {
        bail!("{} site entries have configuration problems", sites.issues.len());
    }
    println!("\n{} sites ready", sites.sources.len());
    Ok(())
}

async fn run(sites: LoadedSites, dry_run: bool) -> Result<()> {
    info!("Event signal scout starting...");

    let config = Config::from_env();
    config.log_redacted();

    let settings = sites.settings.clone();
    let (min_delay, max_delay) = settings.delay_range();
    let limiter = Arc::new(RateLimiter::new(min_delay, max_delay));

    let fetcher: Arc<dyn HttpFetcher> = Arc::new(ReqwestFetcher::new(settings.request_timeout())?);
    let renderer: Arc<dyn PageRenderer> = match config.browserless_url.as_deref() {
        Some(url) => Arc::new(BrowserlessRenderer::new(url, config.browserless_token.as_deref())?),
        None => Arc::new(ChromeRenderer::new(config.chrome_bin.clone())),
    };
    let vision: Option<Arc<dyn VisionService>> = match config.anthropic_api_key.as_deref() {
        Some(key) => Some(Arc::new(ClaudeVision::new(
            key,
            &config.vision_model,
            settings.request_timeout(),
        ))),
        None => {
            warn!("ANTHROPIC_API_KEY not set, vision sites will fail");
            None
        }
    };
    info!(renderer = renderer.name(), "Renderer selected");

    // One document is a download plus a model call, each bounded by the
    // request timeout.
    let extractor = Arc::new(
        MethodExtractor::new(fetcher, renderer, vision, limiter.clone())
            .with_document_timeout(settings.request_timeout().saturating_mul(2)),
    );
    let pipeline = Pipeline::new(extractor, limiter, settings);

    let cancelled = pipeline.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current source");
            cancelled.store(true, Ordering::Relaxed);
        }
    });

    let report = pipeline.run(&sites).await;
    info!("Event scrape complete. {}", report.summary);

    for diag in report.diagnostics.iter().filter(|d| d.attempted && !d.succeeded) {
        warn!(
            source = diag.source.as_str(),
            kind = ?diag.error_kind,
            error = diag.error.as_deref().unwrap_or(""),
            "Source failed"
        );
    }

    if dry_run {
        info!(events = report.events.len(), "Dry run, nothing written");
        return Ok(());
    }

    JsonFileExporter::new(&config.data_dir).export(&report.events, &report.summary)?;
    report.log.save(&report.summary, &config.data_dir)?;

    Ok(())
}
