use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedrank::config::Config;
use feedrank::db::Database;
use feedrank::ingest::{start_background_ingestion, Ingester};
use feedrank::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedrank=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path =
        std::env::var("FEEDRANK_CONFIG").unwrap_or_else(|_| "feedrank.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path)?
    } else {
        info!("No config file at {}, using defaults", config_path);
        Config::default()
    };
    let config = config.with_env_overrides();

    let db = Database::new(&config.database_url).await?;
    db.initialize().await?;
    let seeded = db.seed_feeds(&config.feeds).await?;
    info!("Database initialized, {} configured feeds added", seeded);

    let db = Arc::new(db);

    let ingester = Arc::new(Ingester::new(
        db.clone(),
        Duration::from_secs(config.fetch_timeout_secs),
        config.dedup_scope,
    )?);

    if config.refresh_interval > 0 {
        let bg_ingester = ingester.clone();
        let refresh_interval = config.refresh_interval;
        tokio::spawn(async move {
            start_background_ingestion(bg_ingester, refresh_interval).await;
        });
    } else {
        info!("Background ingestion disabled");
    }

    if config.ingest_token.is_none() {
        info!("POST /ingest is not token protected");
    }

    let state = Arc::new(AppState {
        db: db.clone(),
        ingester,
        ingest_token: config.ingest_token.clone(),
    });

    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server starting on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    db.close().await;
    Ok(())
}
