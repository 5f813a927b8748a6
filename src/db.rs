use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::config::FeedConfig;
use crate::error::StoreError;
use crate::normalize::NormalizedItem;
use crate::ranking::RankedEntry;

/// Syndication format of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FeedFormat {
    #[default]
    Rss,
    Atom,
    Json,
}

impl FeedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedFormat::Rss => "rss",
            FeedFormat::Atom => "atom",
            FeedFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for FeedFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rss" => Ok(FeedFormat::Rss),
            "atom" => Ok(FeedFormat::Atom),
            "json" => Ok(FeedFormat::Json),
            other => Err(format!("unknown feed format: {other}")),
        }
    }
}

/// Which existing entries a new item's guid is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupScope {
    /// Any entry with the same guid, whichever feed it came from.
    #[default]
    Global,
    /// Only entries of the same feed.
    Feed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteType {
    Up,
    Down,
}

impl VoteType {
    pub fn delta(self) -> i64 {
        match self {
            VoteType::Up => 1,
            VoteType::Down => -1,
        }
    }
}

impl TryFrom<i64> for VoteType {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(VoteType::Up),
            -1 => Ok(VoteType::Down),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub site_url: Option<String>,
    pub description: Option<String>,
    pub format: FeedFormat,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFeed {
    pub title: String,
    pub url: String,
    pub site_url: Option<String>,
    pub description: Option<String>,
    pub format: FeedFormat,
}

impl From<&FeedConfig> for NewFeed {
    fn from(config: &FeedConfig) -> Self {
        Self {
            title: config.title.clone(),
            url: config.url.clone(),
            site_url: config.site_url.clone(),
            description: config.description.clone(),
            format: config.format,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub content: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub upvotes_count: i64,
}

/// Fixed-width UTC text so that string order matches time order.
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS feeds (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        url TEXT NOT NULL UNIQUE,
        site_url TEXT,
        description TEXT,
        format TEXT NOT NULL DEFAULT 'rss' CHECK (format IN ('rss', 'atom', 'json')),
        last_fetched_at TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entries (
        id INTEGER PRIMARY KEY,
        feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
        guid TEXT NOT NULL,
        title TEXT NOT NULL,
        link TEXT NOT NULL,
        content TEXT,
        author TEXT,
        published_at TEXT,
        created_at TEXT NOT NULL,
        upvotes_count INTEGER NOT NULL DEFAULT 0,
        UNIQUE(feed_id, guid)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_entries_guid ON entries(guid)",
    "CREATE INDEX IF NOT EXISTS idx_entries_created_at ON entries(created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS votes (
        id INTEGER PRIMARY KEY,
        entry_id INTEGER REFERENCES entries(id) ON DELETE SET NULL,
        value INTEGER NOT NULL CHECK (value IN (1, -1)),
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_votes_entry ON votes(entry_id)",
    // Full-text indexes over feed and entry text, kept current by triggers.
    r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS feeds_fts USING fts5(
        title, url, description, content='feeds', content_rowid='id'
    )
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS feeds_fts_insert AFTER INSERT ON feeds BEGIN
        INSERT INTO feeds_fts(rowid, title, url, description)
        VALUES (new.id, new.title, new.url, new.description);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS feeds_fts_delete AFTER DELETE ON feeds BEGIN
        INSERT INTO feeds_fts(feeds_fts, rowid, title, url, description)
        VALUES ('delete', old.id, old.title, old.url, old.description);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS feeds_fts_update AFTER UPDATE OF title, url, description ON feeds BEGIN
        INSERT INTO feeds_fts(feeds_fts, rowid, title, url, description)
        VALUES ('delete', old.id, old.title, old.url, old.description);
        INSERT INTO feeds_fts(rowid, title, url, description)
        VALUES (new.id, new.title, new.url, new.description);
    END
    "#,
    r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
        title, link, content, author, content='entries', content_rowid='id'
    )
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS entries_fts_insert AFTER INSERT ON entries BEGIN
        INSERT INTO entries_fts(rowid, title, link, content, author)
        VALUES (new.id, new.title, new.link, new.content, new.author);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS entries_fts_delete AFTER DELETE ON entries BEGIN
        INSERT INTO entries_fts(entries_fts, rowid, title, link, content, author)
        VALUES ('delete', old.id, old.title, old.link, old.content, old.author);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS entries_fts_update AFTER UPDATE OF title, link, content, author ON entries BEGIN
        INSERT INTO entries_fts(entries_fts, rowid, title, link, content, author)
        VALUES ('delete', old.id, old.title, old.link, old.content, old.author);
        INSERT INTO entries_fts(rowid, title, link, content, author)
        VALUES (new.id, new.title, new.link, new.content, new.author);
    END
    "#,
];

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Registers configured feeds whose url is not known yet. Existing rows
    /// are left untouched. Returns how many feeds were added.
    pub async fn seed_feeds(&self, configs: &[FeedConfig]) -> anyhow::Result<u64> {
        let mut added = 0;
        for config in configs {
            let feed = NewFeed::from(config);
            let result = sqlx::query(
                r#"
                INSERT INTO feeds (title, url, site_url, description, format, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(url) DO NOTHING
                "#,
            )
            .bind(&feed.title)
            .bind(&feed.url)
            .bind(&feed.site_url)
            .bind(&feed.description)
            .bind(feed.format)
            .bind(timestamp(Utc::now()))
            .execute(&self.pool)
            .await?;
            added += result.rows_affected();
        }
        Ok(added)
    }

    pub async fn create_feed(&self, feed: &NewFeed) -> Result<Feed, StoreError> {
        let result = sqlx::query_as::<_, Feed>(
            r#"
            INSERT INTO feeds (title, url, site_url, description, format, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&feed.title)
        .bind(&feed.url)
        .bind(&feed.site_url)
        .bind(&feed.description)
        .bind(feed.format)
        .bind(timestamp(Utc::now()))
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(feed) => Ok(feed),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateUrl(feed.url.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_all_feeds(&self) -> anyhow::Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>("SELECT * FROM feeds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> anyhow::Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Records a successful fetch. `site_url` only fills a missing value.
    pub async fn mark_fetched(&self, feed_id: i64, site_url: Option<&str>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched_at = ?, site_url = COALESCE(site_url, ?)
            WHERE id = ?
            "#,
        )
        .bind(timestamp(Utc::now()))
        .bind(site_url)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts the item unless an entry with the same guid already exists
    /// within `scope`. The existence check and the insert are one statement,
    /// and `UNIQUE(feed_id, guid)` turns a lost race into a no-op.
    /// Returns whether a row was written.
    pub async fn insert_entry_if_absent(
        &self,
        feed_id: i64,
        item: &NormalizedItem,
        created_at: DateTime<Utc>,
        scope: DedupScope,
    ) -> anyhow::Result<bool> {
        let existing = match scope {
            DedupScope::Global => "SELECT 1 FROM entries WHERE guid = ?2",
            DedupScope::Feed => "SELECT 1 FROM entries WHERE guid = ?2 AND feed_id = ?1",
        };
        let sql = format!(
            r#"
            INSERT OR IGNORE INTO entries (feed_id, guid, title, link, content, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6
            WHERE NOT EXISTS ({existing})
            "#
        );

        let result = sqlx::query(&sql)
            .bind(feed_id)
            .bind(&item.guid)
            .bind(&item.title)
            .bind(&item.link)
            .bind(&item.content)
            .bind(timestamp(created_at))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_entry(&self, entry_id: i64) -> anyhow::Result<Option<Entry>> {
        let entry = sqlx::query_as::<_, Entry>("SELECT * FROM entries WHERE id = ?")
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    pub async fn get_entries_for_feed(&self, feed_id: i64, limit: i64) -> anyhow::Result<Vec<Entry>> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT * FROM entries
            WHERE feed_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    pub async fn count_entries(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Entries created strictly after `since`, joined with their feed title.
    pub async fn recent_entries_with_feed(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<RankedEntry>> {
        let rows = sqlx::query_as::<_, RankedEntry>(
            r#"
            SELECT e.id, e.feed_id, f.title AS feed_title, e.title, e.link,
                   e.content, e.author, e.upvotes_count, e.created_at
            FROM entries e
            INNER JOIN feeds f ON f.id = e.feed_id
            WHERE e.created_at > ?
            "#,
        )
        .bind(timestamp(since))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Applies a vote: adjusts the counter in place and appends to the vote
    /// log inside one transaction. Returns the new counter value.
    pub async fn record_vote(&self, entry_id: i64, vote: VoteType) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE entries
            SET upvotes_count = upvotes_count + ?
            WHERE id = ?
            RETURNING upvotes_count
            "#,
        )
        .bind(vote.delta())
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((count,)) = updated else {
            tx.rollback().await?;
            return Err(StoreError::NotFound {
                entity: "entry",
                id: entry_id,
            });
        };

        sqlx::query("INSERT INTO votes (entry_id, value, created_at) VALUES (?, ?, ?)")
            .bind(entry_id)
            .bind(vote.delta())
            .bind(timestamp(Utc::now()))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(count)
    }

    /// Net sum of the vote log for an entry.
    pub async fn vote_log_total(&self, entry_id: i64) -> anyhow::Result<i64> {
        let total: (i64,) =
            sqlx::query_as("SELECT COALESCE(SUM(value), 0) FROM votes WHERE entry_id = ?")
                .bind(entry_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(total.0)
    }

    /// Full-text search over entry title, link, content and author.
    /// Every whitespace separated term must match.
    pub async fn search_entries(&self, query: &str, limit: i64) -> anyhow::Result<Vec<Entry>> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT e.* FROM entries_fts
            INNER JOIN entries e ON e.id = entries_fts.rowid
            WHERE entries_fts MATCH ?
            ORDER BY entries_fts.rank, e.id
            LIMIT ?
            "#,
        )
        .bind(match_expr)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

/// Reduces free text to quoted word terms so user input cannot inject FTS5
/// query syntax.
fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}
