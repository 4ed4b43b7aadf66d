use anyhow::{Context, Result};
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

use config::{AppConfig, ObjectStoreConfig};
use services::{
    image_service::ImageService, local_store::LocalObjectStore, metadata_store::MetadataStore,
    object_store::ObjectStore, s3_store::S3ObjectStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting image-store with config: {:?}", cfg);

    // --- Open the metadata store; failing here ends the process ---
    let metadata = match connect_metadata(&cfg.database_url).await {
        Ok(metadata) => metadata,
        Err(err) => {
            tracing::error!("Error connecting to metadata store: {:#}", err);
            return Err(err);
        }
    };
    tracing::info!("Metadata store connected");

    metadata
        .migrate()
        .await
        .context("applying metadata schema")?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize object store + core service ---
    let objects: Arc<dyn ObjectStore> = match &cfg.object_store {
        ObjectStoreConfig::S3(settings) => Arc::new(S3ObjectStore::connect(settings).await?),
        ObjectStoreConfig::Local(settings) => {
            if !Path::new(&settings.storage_dir).exists() {
                fs::create_dir_all(&settings.storage_dir)?;
                tracing::info!("Created storage directory at {}", settings.storage_dir);
            }
            Arc::new(LocalObjectStore::new(
                &settings.storage_dir,
                &settings.public_url,
            )?)
        }
    };
    let service = ImageService::new(objects, metadata, cfg.key_namespace.clone());

    // --- Build router ---
    let app: Router = routes::routes::app(service, cfg.max_upload_bytes);

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

/// Open the SQLite pool behind the metadata store, creating the database
/// file and its parent directory when missing.
async fn connect_metadata(database_url: &str) -> Result<MetadataStore> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database URL `{}`", database_url))?
        .create_if_missing(true);

    let db_path = options.get_filename();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to `{}`", database_url))?;

    Ok(MetadataStore::new(Arc::new(pool)))
}
