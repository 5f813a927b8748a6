//! Time-decayed popularity ranking of recent entries.
//!
//! `score = log10(max(upvotes, 1)) + (created_at - now) / 45000s`
//!
//! Votes count on a log scale and every 45000 seconds (12.5h) of age costs
//! one order of magnitude of votes.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::db::Database;

pub const DECAY_SECONDS: f64 = 45_000.0;
pub const WINDOW_DAYS: i64 = 7;
pub const RANK_LIMIT: usize = 50;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RankedEntry {
    pub id: i64,
    pub feed_id: i64,
    pub feed_title: String,
    pub title: String,
    pub link: String,
    pub content: Option<String>,
    pub author: Option<String>,
    pub upvotes_count: i64,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub score: f64,
}

pub fn score(upvotes: i64, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let votes = upvotes.max(1) as f64;
    let age_seconds = (created_at - now).num_milliseconds() as f64 / 1000.0;
    votes.log10() + age_seconds / DECAY_SECONDS
}

/// Scores the candidates and keeps the best `RANK_LIMIT`, highest score
/// first with ties broken by ascending id.
pub fn rank(mut candidates: Vec<RankedEntry>, now: DateTime<Utc>) -> Vec<RankedEntry> {
    for entry in &mut candidates {
        entry.score = score(entry.upvotes_count, entry.created_at, now);
    }
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
    candidates.truncate(RANK_LIMIT);
    candidates
}

/// Entries from the last `WINDOW_DAYS` days ordered by score.
pub async fn ranked_entries(db: &Database, now: DateTime<Utc>) -> anyhow::Result<Vec<RankedEntry>> {
    let since = now - Duration::days(WINDOW_DAYS);
    let candidates = db.recent_entries_with_feed(since).await?;
    Ok(rank(candidates, now))
}
