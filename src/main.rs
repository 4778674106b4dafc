use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Use the library instead of redeclaring modules
use m3u_merge::{
    config::Config,
    merge::{MergeEngine, PlaylistGenerator},
    services::LivenessProber,
    sources::{PlaylistFetcher, fetch_sources},
};

#[derive(Parser)]
#[command(name = "m3u-merge")]
#[command(version)]
#[command(about = "Merge IPTV channel lists into one deduplicated, ordered playlist")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "m3u-merge.toml")]
    config: PathBuf,

    /// Output playlist path (overrides config file)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Probe stream URLs and drop channels that are entirely dead
    #[arg(long, overrides_with = "no_probe")]
    probe: bool,

    /// Skip liveness probing even if enabled in the config file
    #[arg(long, overrides_with = "probe")]
    no_probe: bool,

    /// Write the run summary as JSON to this path
    #[arg(short, long, value_name = "PATH")]
    summary: Option<PathBuf>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("m3u_merge={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting m3u-merge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    info!("Configuration loaded from: {}", cli.config.display());

    // Override config with CLI arguments
    if let Some(output) = cli.output {
        config.output.path = output;
    }
    if cli.probe {
        config.probe.enabled = true;
    }
    if cli.no_probe {
        config.probe.enabled = false;
    }
    if let Some(summary) = cli.summary {
        config.output.summary_path = Some(summary);
    }

    let fetcher = PlaylistFetcher::new(&config.fetch)?;
    let inputs = fetch_sources(&fetcher, &config.sources).await;

    let mut engine = MergeEngine::new(&config.rules)?
        .with_epg_url(config.output.epg_url.clone())
        .with_epg_candidates(&config.output.epg_candidates);
    if config.probe.enabled {
        engine = engine.with_prober(LivenessProber::with_http(config.probe.clone())?);
    }

    let run = match engine.run(&inputs).await {
        Ok(run) => run,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    let generator = PlaylistGenerator::new(config.output.number_channels);
    let content = generator.generate(&run.playlist);
    generator.save(&config.output.path, &content).await?;

    if let Some(summary_path) = &config.output.summary_path {
        let json = serde_json::to_string_pretty(&run.summary)?;
        tokio::fs::write(summary_path, json)
            .await
            .with_context(|| format!("failed to write summary to {}", summary_path.display()))?;
        info!("Run summary written to {}", summary_path.display());
    }

    Ok(())
}
