mod auth;
mod config;
mod middleware;

mod db;
mod error;
mod models;
mod routes;
mod scheduling;
mod storage;

use std::sync::Arc;

use crate::{
    config::Config, models::AppState, scheduling::intake::MAX_ATTACHMENTS,
    storage::LocalDiskStore,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::extract::DefaultBodyLimit;
use axum::http::header;
use chrono::FixedOffset;
use tracing_subscriber::EnvFilter;

/// Room for the form part and multipart framing on top of the files.
const BODY_OVERHEAD_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;

    tokio::fs::create_dir_all(&cfg.storage_dir).await?;
    let store = LocalDiskStore::new(&cfg.storage_dir, &cfg.public_base_url);
    tracing::info!(root = %store.root().display(), "attachment store ready");

    let clinic_offset = FixedOffset::east_opt(cfg.clinic_utc_offset_minutes * 60)
        .ok_or_else(|| anyhow::anyhow!("invalid clinic UTC offset"))?;

    let state = AppState {
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        login_email_domain: cfg.login_email_domain.clone(),
        clinic_name: cfg.clinic_name.clone(),
        clinic_offset,
        store: Arc::new(store),
        max_attachment_bytes: cfg.max_attachment_bytes,
    };

    // Browser and WebView front ends call the API cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let body_limit = cfg.max_attachment_bytes * MAX_ATTACHMENTS + BODY_OVERHEAD_BYTES;

    let app = routes::router(state, &cfg.storage_dir)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!(clinic = %cfg.clinic_name, "Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
