//! Pagescope main entry point
//!
//! This is the command-line interface for the Pagescope analysis service.

use anyhow::Context;
use clap::Parser;
use pagescope::config::{default_config, load_config_with_hash, Config};
use pagescope::pipeline::{Outcome, Pipeline};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Pagescope: accessibility, SEO and performance analysis for web pages
///
/// Pagescope fetches a page once, fans it out to analysis workers through a
/// durable job queue and aggregates their findings into a scored report.
#[derive(Parser, Debug)]
#[command(name = "pagescope")]
#[command(version)]
#[command(about = "Multi-worker site analysis service", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and print the effective settings without starting
    #[arg(long, conflicts_with_all = ["stats", "analyze"])]
    dry_run: bool,

    /// Show statistics from the queue database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "analyze"])]
    stats: bool,

    /// Analyze one site in-process, print the JSON report and exit
    #[arg(long, value_name = "URL", conflicts_with_all = ["dry_run", "stats"])]
    analyze: Option<String>,

    /// Report type for --analyze (full, summary, accessibility, seo, performance)
    #[arg(long, value_name = "TYPE", requires = "analyze")]
    report_type: Option<String>,

    /// Also write the --analyze report as markdown
    #[arg(long, value_name = "PATH", requires = "analyze")]
    markdown: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            default_config().context("invalid default configuration")?
        }
    };

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else if let Some(url) = &cli.analyze {
        handle_analyze(
            &config,
            url,
            cli.report_type.as_deref(),
            cli.markdown.as_ref(),
        )
        .await
    } else {
        handle_serve(config).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("pagescope=info,warn"),
            1 => EnvFilter::new("pagescope=debug,tower_http=debug,info"),
            2 => EnvFilter::new("pagescope=trace,tower_http=debug,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: prints the effective configuration
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Pagescope Dry Run ===\n");

    println!("Server:");
    println!("  Listen: {}", config.server.listen);
    println!("  Max wait: {}ms", config.server.max_wait_ms);

    println!("\nQueue:");
    println!("  Database: {}", config.queue.database_path);
    println!("  Lease: {}ms", config.queue.lease_ms);
    println!("  Poll interval: {}ms", config.queue.poll_interval_ms);
    println!("  Max attempts: {}", config.queue.max_attempts);

    println!("\nFetcher:");
    println!("  Renderer: {:?}", config.fetcher.renderer);
    println!("  User agent: {}", config.fetcher.user_agent);
    println!(
        "  Navigation timeout: {}ms",
        config.fetcher.navigation_timeout_ms
    );
    println!(
        "  Retries: {} (delay {}ms)",
        config.fetcher.max_retries, config.fetcher.retry_delay_ms
    );

    println!("\nWorkers:");
    println!("  Fetch: {}", config.workers.fetch);
    println!("  Accessibility: {}", config.workers.accessibility);
    println!("  SEO: {}", config.workers.seo);
    println!("  Performance: {}", config.workers.performance);

    println!("\nPipeline:");
    println!(
        "  Request timeout: {}ms",
        config.pipeline.request_timeout_ms
    );
    println!("  Report TTL: {}s", config.pipeline.report_ttl_secs);
    println!(
        "  Weights: accessibility={} seo={} performance={}",
        config.pipeline.weights.accessibility,
        config.pipeline.weights.seo,
        config.pipeline.weights.performance
    );

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows statistics from the queue database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use pagescope::output::{load_statistics, print_statistics};
    use pagescope::queue::SqliteStore;

    println!("Database: {}\n", config.queue.database_path);

    let store = SqliteStore::open(
        &config.queue.database_path,
        config.queue.lease(),
        config.queue.max_attempts,
    )
    .context("failed to open the queue database")?;

    let stats = load_statistics(&store)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --analyze mode: runs one request through an in-process pipeline
async fn handle_analyze(
    config: &Config,
    url: &str,
    report_type: Option<&str>,
    markdown: Option<&PathBuf>,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::start(config).await?;
    let handle = pipeline.handle();

    let outcome = handle.analyze(url, report_type).await;
    pipeline.shutdown().await;

    match outcome? {
        Outcome::Completed(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            if let Some(path) = markdown {
                pagescope::output::write_markdown_report(&report, path)?;
                tracing::info!("Markdown report written to {}", path.display());
            }
            Ok(())
        }
        Outcome::Failed {
            request_id,
            failure,
        } => anyhow::bail!("request {} failed: {}", request_id, failure),
        Outcome::Pending { request_id, status } => anyhow::bail!(
            "request {} still {} after {}ms",
            request_id,
            status,
            config.server.max_wait_ms
        ),
    }
}

/// Handles the default mode: serves the API with every worker in-process
async fn handle_serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        "Starting workers: fetch={} accessibility={} seo={} performance={}",
        config.workers.fetch,
        config.workers.accessibility,
        config.workers.seo,
        config.workers.performance
    );

    let pipeline = Pipeline::start(&config).await?;

    let served =
        pagescope::api::serve(&config.server.listen, pipeline.handle(), shutdown_signal()).await;

    pipeline.shutdown().await;
    served?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received ctrl-c, shutting down"),
        Err(e) => {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
