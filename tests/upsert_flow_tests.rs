//! Persistence flow tests against an in-memory SQLite store

use chrono::Utc;
use review_crawler::domain::{BrokerReview, PageMetadata, PageRecord};
use review_crawler::infrastructure::page_repository::{UpsertOptions, UpsertOutcome};
use review_crawler::{DatabaseConnection, PageRepository};

async fn repository() -> PageRepository {
    let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    PageRepository::new(db.pool().clone())
}

fn record(url: &str, sha256: &str, text: &str) -> PageRecord {
    PageRecord {
        url: url.to_string(),
        status: 200,
        fetched_at: Utc::now(),
        sha256: sha256.to_string(),
        html: format!("<html><body><p>{text}</p></body></html>"),
        text_content: text.to_string(),
        metadata: PageMetadata::default(),
        review: None,
    }
}

fn review_record(url: &str, sha256: &str) -> PageRecord {
    let mut page = record(url, sha256, "review body");
    page.review = Some(BrokerReview::new("Etoro", "etoro"));
    page
}

const SKIP_UNCHANGED: UpsertOptions = UpsertOptions {
    force: false,
    skip_if_exists: true,
};

const TOUCH_UNCHANGED: UpsertOptions = UpsertOptions {
    force: false,
    skip_if_exists: false,
};

#[test]
fn default_options_match_the_system_defaults() {
    let options = UpsertOptions::default();
    assert!(options.skip_if_exists);
    assert!(!options.force);
}

#[tokio::test]
async fn default_options_skip_an_unchanged_revisit() {
    let repo = repository().await;
    let page = record("https://brokerchooser.com/a/", "h1", "a");

    repo.upsert_page(&page, UpsertOptions::default()).await.unwrap();
    let outcome = repo.upsert_page(&page, UpsertOptions::default()).await.unwrap();
    assert_eq!(outcome, UpsertOutcome::Skipped);
}

#[tokio::test]
async fn new_url_is_inserted() {
    let repo = repository().await;
    let outcome = repo
        .upsert_page(&record("https://brokerchooser.com/a/", "h1", "a"), SKIP_UNCHANGED)
        .await
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::Inserted);

    let stored = repo
        .get_page_by_url("https://brokerchooser.com/a/")
        .await
        .unwrap()
        .expect("row expected");
    assert_eq!(stored.sha256, "h1");
    assert_eq!(stored.status, 200);
}

#[tokio::test]
async fn unchanged_content_is_skipped_when_configured() {
    let repo = repository().await;
    let page = record("https://brokerchooser.com/a/", "h1", "a");

    repo.upsert_page(&page, SKIP_UNCHANGED).await.unwrap();
    let outcome = repo.upsert_page(&page, SKIP_UNCHANGED).await.unwrap();
    assert_eq!(outcome, UpsertOutcome::Skipped);
}

#[tokio::test]
async fn unchanged_content_refreshes_only_the_timestamp() {
    let repo = repository().await;
    let first = record("https://brokerchooser.com/a/", "h1", "a");
    repo.upsert_page(&first, SKIP_UNCHANGED).await.unwrap();

    let mut revisit = record("https://brokerchooser.com/a/", "h1", "a");
    revisit.fetched_at = Utc::now() + chrono::Duration::hours(1);

    let outcome = repo.upsert_page(&revisit, TOUCH_UNCHANGED).await.unwrap();
    assert_eq!(outcome, UpsertOutcome::Touched);

    let stored = repo
        .get_page_by_url("https://brokerchooser.com/a/")
        .await
        .unwrap()
        .unwrap();
    assert!(stored.fetched_at > first.fetched_at);
    assert_eq!(stored.sha256, "h1");
}

#[tokio::test]
async fn changed_content_replaces_the_row() {
    let repo = repository().await;
    repo.upsert_page(&record("https://brokerchooser.com/a/", "h1", "old"), SKIP_UNCHANGED)
        .await
        .unwrap();

    let outcome = repo
        .upsert_page(&record("https://brokerchooser.com/a/", "h2", "new"), SKIP_UNCHANGED)
        .await
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::Updated);

    let stored = repo
        .get_page_by_url("https://brokerchooser.com/a/")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sha256, "h2");
}

#[tokio::test]
async fn force_rewrites_even_unchanged_content() {
    let repo = repository().await;
    let page = record("https://brokerchooser.com/a/", "h1", "a");
    repo.upsert_page(&page, SKIP_UNCHANGED).await.unwrap();

    let outcome = repo
        .upsert_page(
            &page,
            UpsertOptions {
                force: true,
                skip_if_exists: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::Updated);
}

#[tokio::test]
async fn review_payload_round_trips_through_store_stats() {
    let repo = repository().await;
    repo.upsert_page(
        &review_record("https://brokerchooser.com/broker-reviews/etoro/", "h1"),
        SKIP_UNCHANGED,
    )
    .await
    .unwrap();
    repo.upsert_page(&record("https://brokerchooser.com/blog/x/", "h2", "b"), SKIP_UNCHANGED)
        .await
        .unwrap();

    let stats = repo.stats().await.unwrap();
    assert_eq!(stats.total_pages, 2);
    assert_eq!(stats.review_pages, 1);
}

#[tokio::test]
async fn filter_existing_reports_only_stored_urls() {
    let repo = repository().await;
    repo.upsert_page(&record("https://brokerchooser.com/a/", "h1", "a"), SKIP_UNCHANGED)
        .await
        .unwrap();
    repo.upsert_page(&record("https://brokerchooser.com/b/", "h2", "b"), SKIP_UNCHANGED)
        .await
        .unwrap();

    let existing = repo
        .filter_existing(&[
            "https://brokerchooser.com/a/".to_string(),
            "https://brokerchooser.com/b/".to_string(),
            "https://brokerchooser.com/c/".to_string(),
        ])
        .await
        .unwrap();

    assert_eq!(existing.len(), 2);
    assert!(existing.contains("https://brokerchooser.com/a/"));
    assert!(existing.contains("https://brokerchooser.com/b/"));
    assert!(!existing.contains("https://brokerchooser.com/c/"));
}

#[tokio::test]
async fn filter_existing_on_an_empty_slice_is_empty() {
    let repo = repository().await;
    let existing = repo.filter_existing(&[]).await.unwrap();
    assert!(existing.is_empty());
}

#[tokio::test]
async fn batch_upsert_counts_writes_and_skips() {
    let repo = repository().await;
    repo.upsert_page(&record("https://brokerchooser.com/0/", "sha-0", "page 0"), SKIP_UNCHANGED)
        .await
        .unwrap();
    repo.reset_counters();

    let records: Vec<PageRecord> = (0..10)
        .map(|i| {
            record(
                &format!("https://brokerchooser.com/{i}/"),
                &format!("sha-{i}"),
                &format!("page {i}"),
            )
        })
        .collect();

    let report = repo.batch_upsert(&records, SKIP_UNCHANGED).await;
    assert_eq!(report.written, 9);
    assert_eq!(report.skipped, 1);
    assert!(report.failures.is_empty());

    let counters = repo.counters();
    assert_eq!(counters.total, 10);
    assert_eq!(counters.succeeded, 9);
    assert_eq!(counters.skipped, 1);
    assert_eq!(counters.failed, 0);
    assert_eq!(counters.batches, 1);
}

#[tokio::test]
async fn session_counters_track_every_upsert() {
    let repo = repository().await;
    let page = record("https://brokerchooser.com/a/", "h1", "a");

    repo.upsert_page(&page, SKIP_UNCHANGED).await.unwrap();
    repo.upsert_page(&page, SKIP_UNCHANGED).await.unwrap();
    repo.upsert_page(&record("https://brokerchooser.com/a/", "h2", "a2"), SKIP_UNCHANGED)
        .await
        .unwrap();

    let counters = repo.counters();
    assert_eq!(counters.total, 3);
    assert_eq!(counters.succeeded, 2);
    assert_eq!(counters.skipped, 1);

    repo.reset_counters();
    assert_eq!(repo.counters().total, 0);
}
