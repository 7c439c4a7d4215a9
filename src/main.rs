use anyhow::{Context, Result};
use axum::Router;
use dedup_uploader::{
    Backend, DiskBackend, MemoryBackend, SqliteMetadataStore, UploadContext, UrlSigner,
    config::{AppConfig, BackendKind},
    handlers::AppState,
    routes,
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting dedup-uploader: addr={} backend={:?} storage={} db={} limits={:?}",
        cfg.addr(),
        cfg.backend,
        cfg.storage_dir,
        cfg.database_url,
        cfg.limits
    );

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    if !db_url.contains(":memory:") {
        let db_path = db_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim_start_matches("file:");
        tracing::debug!("Interpreted SQLite path => {}", db_path);

        // Create parent directory if needed
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let store = SqliteMetadataStore::connect(db_url, 5)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;

    // --- Handle migration mode ---
    if migrate {
        store.migrate().await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    let signer = match cfg.presign_secret.as_deref() {
        Some(secret) => {
            let public_url = cfg
                .public_url
                .clone()
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", cfg.port));
            Some(UrlSigner::new(&public_url, secret).context("invalid public url")?)
        }
        None => None,
    };

    // --- Initialize backend ---
    let backend: Arc<dyn Backend> = match cfg.backend {
        BackendKind::Disk => {
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }
            let mut disk =
                DiskBackend::new(&cfg.storage_dir).with_single_put_limit(cfg.limits.single_put_limit);
            if let Some(signer) = signer.clone() {
                disk = disk.with_signer(signer);
            }
            Arc::new(disk)
        }
        BackendKind::Memory => {
            tracing::warn!("Using in-memory backend; stored objects are lost on exit");
            Arc::new(MemoryBackend::new().with_single_put_limit(cfg.limits.single_put_limit))
        }
    };

    let ctx = UploadContext::new(backend, Arc::new(store)).with_limits(cfg.limits);
    let state = AppState::new(ctx, signer);

    // --- Build router ---
    let app: Router = routes::routes(cfg.body_limit()).with_state(state);

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
