use anyhow::{Context, Result};
use clap::Parser;
use photo_store::{
    config::{AppConfig, Args},
    routes,
    services::{
        clock::SystemClock, metadata::PgMetadataStore, object_store::S3ObjectStore,
        password::PasswordHasherService,
        session_store::{RedisTokenCache, SessionStore},
    },
    state::AppState,
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // --- Logging setup ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args(&args)?;
    tracing::info!("Starting photo-store with config: {:?}", cfg);

    // --- Metadata store ---
    let metadata = PgMetadataStore::connect(&cfg.database).await?;

    // --- Handle migration mode ---
    if args.migrate {
        metadata.migrate().await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Token cache, object store, services ---
    let cache = RedisTokenCache::connect(
        &cfg.redis.addr,
        cfg.redis.password.expose(),
        cfg.redis.db,
    )
    .await?;
    let token_ttl = cfg
        .auth
        .token_ttl()
        .context("AUTH_TOKEN_EXPIRATION_MIN is out of range")?;
    let sessions = SessionStore::new(Arc::new(cache), Arc::new(SystemClock), token_ttl);
    let objects = S3ObjectStore::new(&cfg.aws).await;
    let hasher = PasswordHasherService::new(cfg.auth.token_secret.expose())?;

    let state = AppState::new(
        Arc::new(metadata),
        Arc::new(objects),
        sessions,
        hasher,
        cfg.server.read_timeout,
    );

    // --- Build router ---
    let app = routes::routes::app(state, &cfg.server);

    // --- Start server ---
    let addr = cfg.server.bind_addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::PermissionDenied && addr.starts_with("0.0.0.0:") => {
            let fallback_addr = addr.replacen("0.0.0.0", "127.0.0.1", 1);
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
