use anyhow::Result;
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use models::subscription::Plan;
use services::{
    backend::{BackingFiles, HttpBackend, LocalBackend, StorageBackend},
    link_resolver::LinkResolver,
    metadata_store::MetadataStore,
    object_service::ObjectService,
    quota::{QuotaEngine, SubscriptionQuotaSource},
    token_issuer::TokenIssuer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting fleet-object-store with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(cfg.call_timeout)
            .connect_with(options)
            .await?,
    );
    let store = MetadataStore::new(db.clone(), cfg.call_timeout);

    // --- Handle migration mode ---
    if migrate {
        store.migrate().await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Storage backend ---
    let backend: Arc<dyn StorageBackend> = match &cfg.backend_url {
        Some(url) => Arc::new(HttpBackend::new(url.clone(), cfg.call_timeout)?),
        None => {
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }
            Arc::new(LocalBackend::new(&cfg.storage_dir))
        }
    };
    let files = BackingFiles::new(backend, cfg.call_timeout);
    tracing::info!("Checking backing files via {}", files.describe());

    // --- Initialize core services ---
    let quota = QuotaEngine::new(
        store.clone(),
        Arc::new(SubscriptionQuotaSource::new(db.clone())),
        Plan::new(cfg.default_plan.clone(), cfg.default_quota_bytes),
        cfg.call_timeout,
    );
    let resolver = LinkResolver::new(store.clone(), files.clone(), quota.clone());
    let tokens = TokenIssuer::new(
        &cfg.token_secret,
        cfg.token_issuer.clone(),
        chrono::Duration::from_std(cfg.token_ttl)?,
        cfg.public_url.clone(),
    )?;
    let objects = ObjectService::new(store, files, quota, resolver, tokens);

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(objects);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
