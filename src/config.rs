use serde::Deserialize;
use std::path::Path;

use crate::db::{DedupScope, FeedFormat};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Background ingestion interval in minutes, 0 disables the loop
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Per-feed HTTP timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Shared secret required as a bearer token by `POST /ingest`
    #[serde(default)]
    pub ingest_token: Option<String>,
    #[serde(default)]
    pub dedup_scope: DedupScope,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

fn default_database_url() -> String {
    "sqlite:feedrank.db?mode=rwc".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_refresh_interval() -> u64 {
    15
}

fn default_fetch_timeout() -> u64 {
    30
}

/// A feed registered at start-up if its url is not known yet.
#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub format: FeedFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            bind_addr: default_bind_addr(),
            refresh_interval: default_refresh_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            ingest_token: None,
            dedup_scope: DedupScope::default(),
            feeds: Vec::new(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Let `DATABASE_URL` and `INGEST_TOKEN` override the file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(token) = std::env::var("INGEST_TOKEN") {
            self.ingest_token = Some(token);
        }
        self.ingest_token = self.ingest_token.filter(|t| !t.is_empty());
        self
    }
}
