use anyhow::Result;
use axum::Router;
use config::{AppConfig, MetadataBackend, RunMode};
use services::{
    metadata_store::{JsonLinesMetadataStore, MetadataStore, SqliteMetadataStore},
    object_store::S3ObjectStore,
    upload_service::UploadService,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting image-store with config: {:?}", cfg);

    // --- Metadata store ---
    let metadata = open_metadata_store(&cfg).await?;

    if mode == RunMode::Migrate {
        tracing::info!("Metadata migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Ensure staging directory exists ---
    if !Path::new(&cfg.staging_dir).exists() {
        fs::create_dir_all(&cfg.staging_dir)?;
        tracing::info!("Created staging directory at {}", cfg.staging_dir);
    }

    // --- Object store client, built once and shared ---
    let gateway = Arc::new(S3ObjectStore::from_settings(
        &cfg.s3,
        cfg.verify_before_sign,
    )?);

    let uploads = UploadService::new(
        gateway,
        metadata,
        &cfg.staging_dir,
        cfg.key_prefix.clone(),
        cfg.url_ttl_secs,
    );

    if mode == RunMode::Reconcile {
        return reconcile(&uploads).await;
    }

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes)
        .layer(TraceLayer::new_for_http())
        .with_state(uploads);

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

/// Open the configured metadata backend and bring its schema up to date.
async fn open_metadata_store(cfg: &AppConfig) -> Result<Arc<dyn MetadataStore>> {
    match cfg.metadata_backend {
        MetadataBackend::Sqlite => {
            let db_url = &cfg.database_url;
            tracing::debug!("Connecting using raw URL => {}", db_url);

            // Extract the local file path SQLx will use
            let db_path = db_url
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:")
                .trim_start_matches("file:");
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)?;
                    tracing::info!("Created missing directory {:?}", parent);
                }
            }

            let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?;

            let store = SqliteMetadataStore::new(Arc::new(pool));
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        MetadataBackend::JsonFile => {
            if let Some(parent) = Path::new(&cfg.records_file).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)?;
                    tracing::info!("Created missing directory {:?}", parent);
                }
            }
            tracing::info!("Recording uploads in {}", cfg.records_file);
            Ok(Arc::new(JsonLinesMetadataStore::new(&cfg.records_file)))
        }
    }
}

/// Report objects under the upload prefix that no record references.
async fn reconcile(uploads: &UploadService) -> Result<()> {
    let orphans = uploads.find_orphaned_objects().await?;
    if orphans.is_empty() {
        tracing::info!("No orphaned objects under {}/", uploads.key_prefix);
        return Ok(());
    }

    tracing::warn!(
        "Found {} orphaned objects under {}/",
        orphans.len(),
        uploads.key_prefix
    );
    for key in orphans {
        println!("{}", key);
    }
    Ok(())
}
