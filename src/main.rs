//! CLI entry point for the crawler
//!
//! Configuration resolves CLI flags over environment variables over
//! defaults. Exit code 0 for completed or cleanly stopped runs, 1 for
//! failed runs and fatal setup errors.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use review_crawler::domain::RunOutcome;
use review_crawler::infrastructure::logging::init_logging;
use review_crawler::{CrawlOrchestrator, CrawlerConfig, DatabaseConnection, PageRepository};

#[derive(Debug, Parser)]
#[command(name = "crawler", version, about = "Crawl brokerchooser.com and extract broker reviews")]
struct Cli {
    /// Re-crawl and rewrite every page, ignoring stored content
    #[arg(long)]
    force: bool,

    /// Crawl every discovered URL instead of resuming past progress
    #[arg(long)]
    no_resume: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// Number of concurrent crawl workers
    #[arg(long)]
    concurrency: Option<usize>,

    /// Cap on the number of URLs crawled this run
    #[arg(long)]
    max_urls: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Delay between a worker's successive requests, in milliseconds
    #[arg(long)]
    delay: Option<u64>,

    /// Root sitemap URL to start discovery from
    #[arg(long)]
    sitemap: Option<String>,
}

impl Cli {
    fn apply_to(&self, config: &mut CrawlerConfig) {
        config.force |= self.force;
        if self.no_resume {
            config.resumable = false;
        }
        config.debug |= self.debug;
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max_urls) = self.max_urls {
            config.max_urls = Some(max_urls);
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout_secs = timeout;
        }
        if let Some(delay) = self.delay {
            config.request_delay_ms = delay;
        }
        if let Some(sitemap) = &self.sitemap {
            config.sitemap_url = sitemap.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli).await {
        Ok(RunOutcome::Completed) | Ok(RunOutcome::Stopped) => ExitCode::SUCCESS,
        Ok(RunOutcome::Failed) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{e:#}"), "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunOutcome> {
    let mut config = CrawlerConfig::from_env()?;
    cli.apply_to(&mut config);
    config.validate()?;

    let db = DatabaseConnection::new(&config.database_url)
        .await
        .context("failed to open the database")?;
    db.migrate().await.context("failed to run migrations")?;
    db.ping().await?;

    let repository = PageRepository::new(db.pool().clone());
    let orchestrator = Arc::new(CrawlOrchestrator::new(config, repository)?);

    // First signal stops cooperatively, second one exits immediately.
    let interrupt_target = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, stopping after in-flight pages");
        interrupt_target.stop();
        shutdown_signal().await;
        warn!("second shutdown signal, exiting immediately");
        std::process::exit(130);
    });

    let report = orchestrator.run().await?;

    for record in &report.stats.errors {
        warn!(url = %record.url, error = %record.error, "page failed during the run");
    }
    if report.stats.errors_truncated > 0 {
        warn!(
            dropped = report.stats.errors_truncated,
            "additional failures were not recorded individually"
        );
    }
    info!(
        upserts_total = report.upserts.total,
        upserts_succeeded = report.upserts.succeeded,
        upserts_skipped = report.upserts.skipped,
        upserts_failed = report.upserts.failed,
        success_rate = format!("{:.2}", report.success_rate),
        "final report"
    );

    Ok(report.outcome)
}

/// Resolves on SIGINT, and on SIGTERM where that exists.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
