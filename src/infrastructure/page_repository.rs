//! Page persistence with content-hash deduplication
//!
//! The `url` column is the single source of truth for idempotency. The
//! upsert decision table (force off):
//!
//! | existing row | same hash | skip_if_exists | action                |
//! |--------------|-----------|----------------|-----------------------|
//! | no           | -         | -              | insert                |
//! | yes          | yes       | yes            | skip, no write        |
//! | yes          | yes       | no             | touch fetched_at only |
//! | yes          | no        | -              | full upsert           |
//!
//! `force` bypasses the existence check and always fully upserts.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use sqlx::{QueryBuilder, Row, SqlitePool};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{PageRecord, UpsertCounters};
use crate::infrastructure::error::CrawlerError;

/// Pages written concurrently per batch.
pub const BATCH_SIZE: usize = 50;
/// Pause between successive batches.
pub const BATCH_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
pub struct UpsertOptions {
    pub force: bool,
    pub skip_if_exists: bool,
}

/// Matches the system defaults: no forced rewrites, unchanged content
/// skipped.
impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            force: false,
            skip_if_exists: true,
        }
    }
}

/// What one upsert actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Content unchanged; only `fetched_at` was refreshed.
    Touched,
    /// Content unchanged and `skip_if_exists` set; no write at all.
    Skipped,
}

/// Lightweight row used for existence/freshness decisions.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPage {
    pub id: i64,
    pub url: String,
    pub status: i64,
    pub fetched_at: DateTime<Utc>,
    pub sha256: String,
}

/// Failures collected from one batch, without aborting it.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: usize,
    pub skipped: usize,
    pub failures: Vec<(String, String)>,
}

/// Store-level totals for the final report.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub total_pages: i64,
    pub review_pages: i64,
}

#[derive(Default)]
struct SessionCounters {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    batches: AtomicU64,
}

/// Repository over the `pages` table. Cheap to clone; counters are shared.
#[derive(Clone)]
pub struct PageRepository {
    pool: Arc<SqlitePool>,
    counters: Arc<SessionCounters>,
}

impl PageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
            counters: Arc::new(SessionCounters::default()),
        }
    }

    /// Store reachability check. Cheap; used as a gate before a run does
    /// any network work.
    pub async fn ping(&self) -> Result<(), CrawlerError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(CrawlerError::persistence)?;
        Ok(())
    }

    /// Point lookup by URL. Not-found is a normal result, not a fault.
    pub async fn get_page_by_url(&self, url: &str) -> Result<Option<StoredPage>, CrawlerError> {
        sqlx::query_as::<_, StoredPage>(
            "SELECT id, url, status, fetched_at, sha256 FROM pages WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&*self.pool)
        .await
        .map_err(CrawlerError::persistence)
    }

    /// Which of `urls` already exist in the store. Used for resume
    /// filtering.
    pub async fn filter_existing(&self, urls: &[String]) -> Result<HashSet<String>, CrawlerError> {
        if urls.is_empty() {
            return Ok(HashSet::new());
        }

        let mut builder = QueryBuilder::new("SELECT url FROM pages WHERE url IN (");
        let mut separated = builder.separated(", ");
        for url in urls {
            separated.push_bind(url);
        }
        builder.push(")");

        let rows = builder
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(CrawlerError::persistence)?;

        Ok(rows.iter().map(|row| row.get::<String, _>(0)).collect())
    }

    /// Insert or update one page per the decision table.
    pub async fn upsert_page(
        &self,
        record: &PageRecord,
        options: UpsertOptions,
    ) -> Result<UpsertOutcome, CrawlerError> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let result = self.upsert_inner(record, options).await;
        match &result {
            Ok(UpsertOutcome::Skipped) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    async fn upsert_inner(
        &self,
        record: &PageRecord,
        options: UpsertOptions,
    ) -> Result<UpsertOutcome, CrawlerError> {
        if options.force {
            return self.write_full(record, false).await;
        }

        match self.get_page_by_url(&record.url).await? {
            None => self.write_full(record, true).await,
            Some(existing) if existing.sha256 == record.sha256 => {
                if options.skip_if_exists {
                    debug!(url = %record.url, "content unchanged, skipping write");
                    Ok(UpsertOutcome::Skipped)
                } else {
                    sqlx::query("UPDATE pages SET fetched_at = ? WHERE url = ?")
                        .bind(record.fetched_at)
                        .bind(&record.url)
                        .execute(&*self.pool)
                        .await
                        .map_err(CrawlerError::persistence)?;
                    Ok(UpsertOutcome::Touched)
                }
            }
            Some(existing) => {
                debug!(
                    url = %record.url,
                    old = %existing.sha256,
                    new = %record.sha256,
                    "content changed, replacing row"
                );
                self.write_full(record, false).await
            }
        }
    }

    async fn write_full(
        &self,
        record: &PageRecord,
        known_new: bool,
    ) -> Result<UpsertOutcome, CrawlerError> {
        let meta = serde_json::to_string(&record.metadata).map_err(CrawlerError::persistence)?;
        let data = record
            .review
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(CrawlerError::persistence)?;

        sqlx::query(
            r#"
            INSERT INTO pages (url, status, fetched_at, sha256, html, text_content, meta, data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                status = excluded.status,
                fetched_at = excluded.fetched_at,
                sha256 = excluded.sha256,
                html = excluded.html,
                text_content = excluded.text_content,
                meta = excluded.meta,
                data = excluded.data
            "#,
        )
        .bind(&record.url)
        .bind(record.status as i64)
        .bind(record.fetched_at)
        .bind(&record.sha256)
        .bind(&record.html)
        .bind(&record.text_content)
        .bind(meta)
        .bind(data)
        .execute(&*self.pool)
        .await
        .map_err(CrawlerError::persistence)?;

        Ok(if known_new {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    /// Upsert many pages in fixed-size batches. Writes inside a batch run
    /// concurrently; failures are collected and never abort the batch.
    pub async fn batch_upsert(
        &self,
        records: &[PageRecord],
        options: UpsertOptions,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, chunk) in records.chunks(BATCH_SIZE).enumerate() {
            if index > 0 {
                tokio::time::sleep(BATCH_DELAY).await;
            }
            self.counters.batches.fetch_add(1, Ordering::Relaxed);

            let writes = chunk.iter().map(|record| async move {
                (record.url.clone(), self.upsert_page(record, options).await)
            });

            for (url, outcome) in join_all(writes).await {
                match outcome {
                    Ok(UpsertOutcome::Skipped) => report.skipped += 1,
                    Ok(_) => report.written += 1,
                    Err(error) => {
                        warn!(url = %url, %error, "batch upsert failure");
                        report.failures.push((url, error.to_string()));
                    }
                }
            }
        }

        report
    }

    pub async fn stats(&self) -> Result<StoreStats, CrawlerError> {
        let total_pages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
            .fetch_one(&*self.pool)
            .await
            .map_err(CrawlerError::persistence)?;
        let review_pages: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pages WHERE data IS NOT NULL")
                .fetch_one(&*self.pool)
                .await
                .map_err(CrawlerError::persistence)?;
        Ok(StoreStats {
            total_pages,
            review_pages,
        })
    }

    /// Snapshot of this session's upsert counters.
    pub fn counters(&self) -> UpsertCounters {
        UpsertCounters {
            total: self.counters.total.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
        }
    }

    /// Reset the session counters between runs.
    pub fn reset_counters(&self) {
        self.counters.total.store(0, Ordering::Relaxed);
        self.counters.succeeded.store(0, Ordering::Relaxed);
        self.counters.failed.store(0, Ordering::Relaxed);
        self.counters.skipped.store(0, Ordering::Relaxed);
        self.counters.batches.store(0, Ordering::Relaxed);
    }
}
