use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tracing::{error, info, warn};

use crate::db::{Database, DedupScope, Feed};
use crate::normalize::{normalize, NormalizedItem};
use crate::parser::{parse_document, ParsedFeed};

/// Outcome of one sweep over all registered feeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub feeds_total: usize,
    pub feeds_failed: usize,
    pub entries_inserted: usize,
}

/// Fetches registered feeds and stores items not seen before.
///
/// Each step (`fetch_document`, `parse`, `process_items`) is idempotent on
/// its own, so a pass interrupted at any point can simply be run again.
pub struct Ingester {
    client: Client,
    db: Arc<Database>,
    dedup_scope: DedupScope,
    running: Arc<AtomicBool>,
}

/// Exclusive claim on the ingester. Releases the claim when dropped, so a
/// pass that panics or is cancelled never leaves the ingester stuck.
#[must_use]
pub struct PassGuard {
    running: Arc<AtomicBool>,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Ingester {
    pub fn new(
        db: Arc<Database>,
        fetch_timeout: Duration,
        dedup_scope: DedupScope,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(fetch_timeout)
            .user_agent(format!("feedrank/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            db,
            dedup_scope,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claims the ingester for one pass, or `None` if a pass holds it.
    pub fn try_claim(&self) -> Option<PassGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| PassGuard {
                running: self.running.clone(),
            })
    }

    /// Runs one ingestion pass. Returns `None` without doing anything when a
    /// pass is already in progress.
    pub async fn run_pass(&self) -> anyhow::Result<Option<IngestReport>> {
        let Some(guard) = self.try_claim() else {
            info!("Ingestion already in progress, skipping");
            return Ok(None);
        };
        self.run_claimed(guard).await.map(Some)
    }

    /// Runs a pass under a claim taken earlier with [`Ingester::try_claim`].
    pub async fn run_claimed(&self, _guard: PassGuard) -> anyhow::Result<IngestReport> {
        self.do_run_pass().await
    }

    async fn do_run_pass(&self) -> anyhow::Result<IngestReport> {
        let feeds = self.db.get_all_feeds().await?;
        info!("Ingesting {} feeds", feeds.len());

        let mut report = IngestReport {
            feeds_total: feeds.len(),
            ..Default::default()
        };

        for feed in feeds {
            match self.ingest_feed(&feed).await {
                Ok(inserted) => report.entries_inserted += inserted,
                Err(e) => {
                    warn!(feed_id = feed.id, url = %feed.url, "Skipping feed '{}': {:#}", feed.title, e);
                    report.feeds_failed += 1;
                }
            }
        }

        info!(
            feeds = report.feeds_total,
            failed = report.feeds_failed,
            inserted = report.entries_inserted,
            "Ingestion pass complete"
        );
        Ok(report)
    }

    /// Fetch, parse, normalize and store one feed. Returns the number of
    /// entries inserted.
    pub async fn ingest_feed(&self, feed: &Feed) -> anyhow::Result<usize> {
        info!("Fetching feed: {} ({})", feed.title, feed.url);

        let body = self.fetch_document(&feed.url).await?;
        let parsed = Self::parse(&body)?;

        let Some(format) = parsed.format() else {
            warn!("Unrecognized document format for feed '{}'", feed.title);
            return Ok(0);
        };
        if format != feed.format {
            info!(
                "Feed '{}' is registered as {} but serves {}",
                feed.title,
                feed.format.as_str(),
                format.as_str()
            );
        }

        let items = normalize(&parsed);
        let inserted = self.process_items(feed.id, &items).await?;

        self.db
            .mark_fetched(feed.id, parsed.metadata().site_url.as_deref())
            .await?;

        info!(
            "Inserted {} of {} items for feed '{}'",
            inserted,
            items.len(),
            feed.title
        );
        Ok(inserted)
    }

    /// GETs the document, treating non-2xx responses as failures.
    pub async fn fetch_document(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<ParsedFeed> {
        Ok(parse_document(body)?)
    }

    /// Inserts items whose guid is not stored yet, in order.
    pub async fn process_items(
        &self,
        feed_id: i64,
        items: &[NormalizedItem],
    ) -> anyhow::Result<usize> {
        let mut inserted = 0;
        for item in items {
            if self
                .db
                .insert_entry_if_absent(feed_id, item, Utc::now(), self.dedup_scope)
                .await?
            {
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

pub async fn start_background_ingestion(ingester: Arc<Ingester>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);

    info!("Starting initial ingestion pass");
    if let Err(e) = ingester.run_pass().await {
        error!("Initial ingestion pass failed: {}", e);
    }

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled ingestion pass");
        if let Err(e) = ingester.run_pass().await {
            error!("Scheduled ingestion pass failed: {}", e);
        }
    }
}
