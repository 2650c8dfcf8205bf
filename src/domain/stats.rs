//! Crawl run statistics and the final report
//!
//! `CrawlStats` is owned exclusively by the orchestrator for the duration of
//! one run; the error list is capped so a badly failing run cannot grow it
//! without bound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of per-URL error records kept in a run.
pub const MAX_ERROR_RECORDS: usize = 100;

/// One recorded per-URL failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlErrorRecord {
    pub url: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Counters for one crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlStats {
    pub total_urls: usize,
    pub crawled: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub reviews_found: usize,
    pub errors: Vec<CrawlErrorRecord>,
    /// Count of errors dropped once the record list hit its cap.
    pub errors_truncated: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CrawlStats {
    pub fn start(total_urls: usize) -> Self {
        Self {
            total_urls,
            crawled: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            reviews_found: 0,
            errors: Vec::new(),
            errors_truncated: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_success(&mut self, found_review: bool) {
        self.crawled += 1;
        self.succeeded += 1;
        if found_review {
            self.reviews_found += 1;
        }
    }

    pub fn record_skip(&mut self) {
        self.crawled += 1;
        self.skipped += 1;
    }

    pub fn record_failure(&mut self, url: &str, error: impl ToString) {
        self.crawled += 1;
        self.failed += 1;
        if self.errors.len() < MAX_ERROR_RECORDS {
            self.errors.push(CrawlErrorRecord {
                url: url.to_string(),
                error: error.to_string(),
                timestamp: Utc::now(),
            });
        } else {
            self.errors_truncated += 1;
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_secs(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Snapshot of the persistence layer's session counters, surfaced alongside
/// the run statistics in the final report.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UpsertCounters {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub batches: u64,
}

/// Terminal state a run ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Stopped,
    Failed,
}

/// Summary produced on every exit path of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlReport {
    pub outcome: RunOutcome,
    pub stats: CrawlStats,
    pub upserts: UpsertCounters,
    pub duration_secs: f64,
    /// Pages processed per second over the whole run.
    pub throughput: f64,
    /// succeeded / crawled, in [0, 1]. 1.0 for an empty run.
    pub success_rate: f64,
}

impl CrawlReport {
    pub fn new(outcome: RunOutcome, stats: CrawlStats, upserts: UpsertCounters) -> Self {
        let duration_secs = stats.duration_secs();
        let throughput = if duration_secs > 0.0 {
            stats.crawled as f64 / duration_secs
        } else {
            0.0
        };
        let success_rate = if stats.crawled > 0 {
            stats.succeeded as f64 / stats.crawled as f64
        } else {
            1.0
        };
        Self {
            outcome,
            stats,
            upserts,
            duration_secs,
            throughput,
            success_rate,
        }
    }
}
