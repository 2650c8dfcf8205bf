//! Crawl orchestration: discovery, scheduling, workers, shutdown
//!
//! One orchestrator drives one run at a time. The run moves through a small
//! state machine:
//!
//!   Idle -> Running -> Completed
//!                   -> Stopping -> Stopped     (cooperative stop)
//!                   -> Failed                  (fatal setup error)
//!
//! Workers pull URLs from a shared claim index instead of a channel; a URL
//! is claimed exactly once and never redistributed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{CrawlReport, CrawlStats, CrawlTask, PageRecord, RunOutcome};
use crate::domain::validate_parsed_data;
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::error::CrawlerError;
use crate::infrastructure::fetch::PageFetcher;
use crate::infrastructure::page_repository::{PageRepository, UpsertOptions, UpsertOutcome};
use crate::infrastructure::parsing::PageParser;
use crate::infrastructure::sitemap::SitemapCollector;

/// URLs per existence query when resuming.
const RESUME_CHECK_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopping,
    Stopped,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Stopped => "stopped",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

/// Drives a full crawl: sitemap discovery, resume filtering, bounded
/// concurrent fetching and persistence.
pub struct CrawlOrchestrator {
    config: CrawlerConfig,
    fetcher: Arc<PageFetcher>,
    parser: Arc<PageParser>,
    repository: PageRepository,
    state: Mutex<RunState>,
    cancel: Mutex<CancellationToken>,
}

impl CrawlOrchestrator {
    pub fn new(config: CrawlerConfig, repository: PageRepository) -> Result<Self, CrawlerError> {
        let fetcher = Arc::new(PageFetcher::from_config(&config)?);
        Ok(Self {
            config,
            fetcher,
            parser: Arc::new(PageParser::new()),
            repository,
            state: Mutex::new(RunState::Idle),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: RunState) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(from = state.as_str(), to = next.as_str(), "run state change");
        *state = next;
    }

    /// Request a cooperative stop. In-flight URLs finish; unclaimed URLs are
    /// left for a later resumed run.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if *state != RunState::Running {
                return;
            }
            *state = RunState::Stopping;
        }
        info!("stop requested, letting in-flight pages finish");
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();
    }

    /// Install a new cancellation token for the next run. A token cancelled
    /// by an earlier stop must not bleed into later runs on this instance.
    fn fresh_cancel(&self) -> CancellationToken {
        let mut guard = self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = CancellationToken::new();
        guard.clone()
    }

    /// Execute one full crawl. Every completed run yields a report; only a
    /// second concurrent `run` call is an error.
    pub async fn run(&self) -> Result<CrawlReport, CrawlerError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if matches!(*state, RunState::Running | RunState::Stopping) {
                return Err(CrawlerError::AlreadyRunning);
            }
            *state = RunState::Running;
        }

        info!(
            sitemap = %self.config.sitemap_url,
            concurrency = self.config.concurrency,
            resumable = self.config.resumable,
            force = self.config.force,
            "starting crawl run"
        );

        // No point discovering thousands of URLs against a dead store.
        if let Err(e) = self.repository.ping().await {
            return Ok(self.fail_run(e));
        }
        let cancel = self.fresh_cancel();

        let collector = match SitemapCollector::new(&self.config, Arc::clone(&self.fetcher)) {
            Ok(collector) => collector,
            Err(e) => return Ok(self.fail_run(e)),
        };
        let collection = match collector.collect_all_urls(&self.config.sitemap_url).await {
            Ok(collection) => collection,
            Err(e) => return Ok(self.fail_run(e)),
        };

        info!(
            discovered = collection.total,
            sitemaps = collection.sitemaps_processed,
            failures = collection.failures,
            "sitemap discovery finished"
        );

        let tasks = self.plan(collection.tasks).await;
        let mut stats = CrawlStats::start(tasks.len());

        if tasks.is_empty() {
            info!("nothing to crawl");
            stats.finish();
            self.set_state(RunState::Completed);
            return Ok(CrawlReport::new(
                RunOutcome::Completed,
                stats,
                self.repository.counters(),
            ));
        }

        let stats = Arc::new(Mutex::new(stats));
        let tasks = Arc::new(tasks);
        let claim = Arc::new(AtomicUsize::new(0));
        let workers = self.config.concurrency.min(tasks.len());

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker_id| {
                let context = WorkerContext {
                    worker_id,
                    fetcher: Arc::clone(&self.fetcher),
                    parser: Arc::clone(&self.parser),
                    repository: self.repository.clone(),
                    tasks: Arc::clone(&tasks),
                    claim: Arc::clone(&claim),
                    stats: Arc::clone(&stats),
                    cancel: cancel.clone(),
                    options: UpsertOptions {
                        force: self.config.force,
                        skip_if_exists: self.config.skip_if_exists,
                    },
                    delay: self.config.request_delay(),
                };
                tokio::spawn(context.run())
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                error!(%e, "crawl worker panicked");
            }
        }

        let mut stats = Arc::try_unwrap(stats)
            .map(|m| m.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
            .unwrap_or_else(|shared| {
                shared
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone()
            });
        stats.finish();

        let outcome = if cancel.is_cancelled() {
            self.set_state(RunState::Stopped);
            RunOutcome::Stopped
        } else {
            self.set_state(RunState::Completed);
            RunOutcome::Completed
        };

        if let Ok(store) = self.repository.stats().await {
            info!(
                total_pages = store.total_pages,
                review_pages = store.review_pages,
                "store totals after run"
            );
        }

        let report = CrawlReport::new(outcome, stats, self.repository.counters());
        info!(
            outcome = ?report.outcome,
            crawled = report.stats.crawled,
            succeeded = report.stats.succeeded,
            failed = report.stats.failed,
            skipped = report.stats.skipped,
            reviews = report.stats.reviews_found,
            duration_secs = format!("{:.1}", report.duration_secs),
            throughput = format!("{:.2}", report.throughput),
            "crawl run finished"
        );
        Ok(report)
    }

    fn fail_run(&self, error: CrawlerError) -> CrawlReport {
        error!(%error, "crawl run failed before any page was processed");
        self.set_state(RunState::Failed);
        let mut stats = CrawlStats::start(0);
        stats.record_failure(&self.config.sitemap_url, &error);
        stats.finish();
        CrawlReport::new(RunOutcome::Failed, stats, self.repository.counters())
    }

    /// Apply resume filtering and the optional URL cap to the discovered
    /// task list. A failed existence query leaves its chunk in the plan; an
    /// extra crawl is cheaper than a lost one.
    async fn plan(&self, tasks: Vec<CrawlTask>) -> Vec<CrawlTask> {
        let discovered = tasks.len();
        let mut planned = if self.config.resumable && !self.config.force {
            let checks = tasks.chunks(RESUME_CHECK_BATCH).map(|chunk| {
                let urls: Vec<String> = chunk.iter().map(|t| t.url.clone()).collect();
                async move { (chunk, self.repository.filter_existing(&urls).await) }
            });

            let mut kept = Vec::with_capacity(tasks.len());
            for (chunk, result) in futures::future::join_all(checks).await {
                match result {
                    Ok(existing) => {
                        kept.extend(chunk.iter().filter(|t| !existing.contains(&t.url)).cloned());
                    }
                    Err(e) => {
                        warn!(%e, "existence check failed, keeping chunk in the plan");
                        kept.extend(chunk.iter().cloned());
                    }
                }
            }
            info!(
                discovered,
                already_stored = discovered - kept.len(),
                remaining = kept.len(),
                "resume filter applied"
            );
            kept
        } else {
            tasks
        };

        if let Some(cap) = self.config.max_urls {
            if planned.len() > cap {
                info!(cap, "truncating plan to the URL cap");
                planned.truncate(cap);
            }
        }
        planned
    }
}

struct WorkerContext {
    worker_id: usize,
    fetcher: Arc<PageFetcher>,
    parser: Arc<PageParser>,
    repository: PageRepository,
    tasks: Arc<Vec<CrawlTask>>,
    claim: Arc<AtomicUsize>,
    stats: Arc<Mutex<CrawlStats>>,
    cancel: CancellationToken,
    options: UpsertOptions,
    delay: std::time::Duration,
}

impl WorkerContext {
    async fn run(self) {
        let mut first = true;
        loop {
            if self.cancel.is_cancelled() {
                debug!(worker = self.worker_id, "worker stopping on cancellation");
                break;
            }

            // Politeness delay between this worker's own requests.
            if !first && !self.delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
            first = false;

            let index = self.claim.fetch_add(1, Ordering::SeqCst);
            let Some(task) = self.tasks.get(index) else {
                break;
            };

            self.process(&task.url).await;
        }
    }

    async fn process(&self, url: &str) {
        let fetched = self.fetcher.fetch(url).await;
        if !fetched.success {
            let reason = fetched
                .error
                .unwrap_or_else(|| "fetch failed without detail".to_string());
            warn!(worker = self.worker_id, url, %reason, "fetch failed");
            self.record_failure(url, reason);
            return;
        }

        let html = fetched.body.unwrap_or_default();
        let status = fetched.status.unwrap_or(200);

        let parsed = match self.parser.parse(&html, url) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(worker = self.worker_id, url, %e, "parse failed");
                self.record_failure(url, e.to_string());
                return;
            }
        };

        let validation = validate_parsed_data(&parsed);
        if !validation.is_valid() {
            warn!(
                worker = self.worker_id,
                url,
                issues = ?validation.issues,
                "page stored despite validation issues"
            );
        }

        let found_review = parsed.review.is_some();
        let record = PageRecord::from_parsed(parsed, status, html);

        match self.repository.upsert_page(&record, self.options).await {
            Ok(UpsertOutcome::Skipped) => {
                debug!(worker = self.worker_id, url, "unchanged, skipped");
                self.stats
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .record_skip();
            }
            Ok(outcome) => {
                debug!(worker = self.worker_id, url, ?outcome, found_review, "page stored");
                self.stats
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .record_success(found_review);
            }
            Err(e) => {
                warn!(worker = self.worker_id, url, %e, "upsert failed");
                self.record_failure(url, e.to_string());
            }
        }
    }

    fn record_failure(&self, url: &str, reason: impl ToString) {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .record_failure(url, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use chrono::Utc;

    fn task(url: &str) -> CrawlTask {
        CrawlTask::new(url, "https://brokerchooser.com/sitemap.xml")
    }

    async fn orchestrator(config: CrawlerConfig) -> (CrawlOrchestrator, PageRepository) {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let repository = PageRepository::new(db.pool().clone());
        let orchestrator = CrawlOrchestrator::new(config, repository.clone()).unwrap();
        (orchestrator, repository)
    }

    fn stored_record(url: &str) -> PageRecord {
        PageRecord {
            url: url.to_string(),
            status: 200,
            fetched_at: Utc::now(),
            sha256: "abc".to_string(),
            html: "<html></html>".to_string(),
            text_content: "text".to_string(),
            metadata: Default::default(),
            review: None,
        }
    }

    #[tokio::test]
    async fn resume_planning_drops_already_stored_urls() {
        let (orchestrator, repository) = orchestrator(CrawlerConfig::default()).await;
        repository
            .upsert_page(&stored_record("https://brokerchooser.com/a/"), UpsertOptions::default())
            .await
            .unwrap();

        let planned = orchestrator
            .plan(vec![
                task("https://brokerchooser.com/a/"),
                task("https://brokerchooser.com/b/"),
            ])
            .await;

        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].url, "https://brokerchooser.com/b/");
    }

    #[tokio::test]
    async fn force_mode_keeps_stored_urls_in_the_plan() {
        let config = CrawlerConfig {
            force: true,
            ..Default::default()
        };
        let (orchestrator, repository) = orchestrator(config).await;
        repository
            .upsert_page(&stored_record("https://brokerchooser.com/a/"), UpsertOptions::default())
            .await
            .unwrap();

        let planned = orchestrator
            .plan(vec![task("https://brokerchooser.com/a/")])
            .await;
        assert_eq!(planned.len(), 1);
    }

    #[tokio::test]
    async fn max_urls_caps_the_plan() {
        let config = CrawlerConfig {
            max_urls: Some(2),
            resumable: false,
            ..Default::default()
        };
        let (orchestrator, _) = orchestrator(config).await;

        let planned = orchestrator
            .plan(vec![
                task("https://brokerchooser.com/a/"),
                task("https://brokerchooser.com/b/"),
                task("https://brokerchooser.com/c/"),
            ])
            .await;
        assert_eq!(planned.len(), 2);
    }

    #[tokio::test]
    async fn second_concurrent_run_is_rejected() {
        let (orchestrator, _) = orchestrator(CrawlerConfig::default()).await;
        orchestrator.set_state(RunState::Running);

        let result = orchestrator.run().await;
        assert!(matches!(result, Err(CrawlerError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn stop_before_running_is_a_no_op() {
        let (orchestrator, _) = orchestrator(CrawlerConfig::default()).await;
        orchestrator.stop();
        assert_eq!(orchestrator.state(), RunState::Idle);
        assert!(!orchestrator.cancel.lock().unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn a_new_run_starts_with_a_fresh_cancellation_token() {
        let (orchestrator, _) = orchestrator(CrawlerConfig::default()).await;
        orchestrator.set_state(RunState::Running);
        orchestrator.stop();
        assert!(orchestrator.cancel.lock().unwrap().is_cancelled());

        let token = orchestrator.fresh_cancel();
        assert!(!token.is_cancelled());
        assert!(!orchestrator.cancel.lock().unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn unreachable_store_fails_the_run_before_discovery() {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let repository = PageRepository::new(db.pool().clone());
        let orchestrator = CrawlOrchestrator::new(CrawlerConfig::default(), repository).unwrap();
        db.pool().close().await;

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(orchestrator.state(), RunState::Failed);
        assert_eq!(report.stats.failed, 1);
    }
}
