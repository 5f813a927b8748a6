use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::db::{Database, Entry, Feed, FeedFormat, NewFeed, VoteType};
use crate::error::ApiError;
use crate::ingest::Ingester;
use crate::ranking::{self, RankedEntry};

const ENTRIES_PER_PAGE: i64 = 50;

pub struct AppState {
    pub db: Arc<Database>,
    pub ingester: Arc<Ingester>,
    /// When set, `POST /ingest` requires `Authorization: Bearer <token>`.
    pub ingest_token: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/feeds", get(list_feeds).post(create_feed))
        .route("/feeds/:id", get(get_feed))
        .route("/feeds/:id/entries", get(feed_entries))
        .route("/entries/:id", get(get_entry))
        .route("/entries/:id/vote", post(vote))
        .route("/ranked-entries", get(ranked_entries))
        .route("/search", get(search))
        .route("/ingest", post(trigger_ingest))
        .route("/ingest/status", get(ingest_status))
        .route("/health", get(health))
        .with_state(state)
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

pub async fn list_feeds(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Feed>>, ApiError> {
    Ok(Json(state.db.get_all_feeds().await?))
}

pub async fn get_feed(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
) -> Result<Json<Feed>, ApiError> {
    state
        .db
        .get_feed(feed_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Feed not found".to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeedRequest {
    pub title: Option<String>,
    pub url: Option<String>,
    #[serde(alias = "site_url")]
    pub site_url: Option<String>,
    pub description: Option<String>,
    pub format: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CreateFeedRequest {
    fn validate(self) -> Result<NewFeed, ApiError> {
        let (Some(title), Some(url)) = (present(self.title), present(self.url)) else {
            return Err(ApiError::Validation("Title and URL are required".to_string()));
        };
        let format = match present(self.format) {
            Some(f) => f.parse::<FeedFormat>().map_err(ApiError::Validation)?,
            None => FeedFormat::Rss,
        };

        Ok(NewFeed {
            title,
            url,
            site_url: present(self.site_url),
            description: present(self.description),
            format,
        })
    }
}

pub async fn create_feed(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateFeedRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Feed>), ApiError> {
    let new_feed = json_body(payload)?.validate()?;
    let feed = state.db.create_feed(&new_feed).await?;
    info!(feed_id = feed.id, url = %feed.url, "Registered feed");
    Ok((StatusCode::CREATED, Json(feed)))
}

pub async fn feed_entries(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
) -> Result<Json<Vec<Entry>>, ApiError> {
    if state.db.get_feed(feed_id).await?.is_none() {
        return Err(ApiError::NotFound("Feed not found".to_string()));
    }
    let entries = state
        .db
        .get_entries_for_feed(feed_id, ENTRIES_PER_PAGE)
        .await?;
    Ok(Json(entries))
}

pub async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<i64>,
) -> Result<Json<Entry>, ApiError> {
    state
        .db
        .get_entry(entry_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Entry not found".to_string()))
}

/// `type` is any JSON number; `1.0` counts as `1`.
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    #[serde(rename = "type")]
    pub vote_type: f64,
}

impl VoteRequest {
    fn vote_type(&self) -> Option<VoteType> {
        if self.vote_type.fract() != 0.0 {
            return None;
        }
        VoteType::try_from(self.vote_type as i64).ok()
    }
}

pub async fn vote(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<i64>,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = json_body(payload).map_err(|_| invalid_vote())?;
    let vote = request.vote_type().ok_or_else(invalid_vote)?;

    let upvotes_count = state.db.record_vote(entry_id, vote).await?;
    Ok(Json(json!({ "success": true, "upvotes_count": upvotes_count })))
}

fn invalid_vote() -> ApiError {
    ApiError::Validation("Invalid vote type".to_string())
}

pub async fn ranked_entries(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RankedEntry>>, ApiError> {
    Ok(Json(ranking::ranked_entries(&state.db, Utc::now()).await?))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Entry>>, ApiError> {
    if query.q.trim().is_empty() {
        return Err(ApiError::Validation("Query parameter q is required".to_string()));
    }
    let entries = state.db.search_entries(&query.q, ENTRIES_PER_PAGE).await?;
    Ok(Json(entries))
}

/// Byte comparison whose duration does not depend on where inputs differ.
fn tokens_match(given: &str, expected: &str) -> bool {
    let (given, expected) = (given.as_bytes(), expected.as_bytes());
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn authorize_ingest(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    if tokens_match(token.trim(), expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("Invalid token".to_string()))
    }
}

pub async fn trigger_ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize_ingest(&headers, state.ingest_token.as_deref())?;

    let Some(guard) = state.ingester.try_claim() else {
        return Ok((StatusCode::ACCEPTED, Json(json!({ "status": "already_running" }))));
    };

    info!("Ingestion pass triggered");
    let ingester = state.ingester.clone();
    tokio::spawn(async move {
        if let Err(e) = ingester.run_claimed(guard).await {
            error!("Triggered ingestion pass failed: {}", e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "started" }))))
}

pub async fn ingest_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "running": state.ingester.is_running() }))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
