use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use versesync::config::{App, Cli, Config, default_config_dir, default_config_path};
use versesync::db::Database;
use versesync::store::{MemoryStore, RecordStore};
use versesync::sync::SyncService;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("versesync.svc starting");

    // With --config the database lives next to the config file,
    // otherwise both sit in ~/.versesync/
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(error = %e, path = ?data_dir, "failed to create data directory");
        std::process::exit(1);
    }

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });

    if args.ephemeral {
        tracing::warn!("running with in-memory store, collections are lost on shutdown");
        serve(Arc::new(MemoryStore::new()), &cfg.app).await;
        return;
    }

    let db = Arc::new(Database::new(&cfg.app, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    }));
    if db.is_replica() {
        if let Err(e) = db.sync().await {
            tracing::warn!(error = %e, "initial replica sync failed, serving local state");
        }
    }

    serve(db.clone(), &cfg.app).await;

    if db.is_replica() {
        if let Err(e) = db.sync().await {
            tracing::error!(error = %e, "final replica sync failed");
        }
    }
    tracing::info!("versesync.svc going off, graceful shutdown complete");
}

async fn serve<S: RecordStore>(store: Arc<S>, cfg: &App) {
    let cors = versesync::cors_layer(cfg).unwrap_or_else(|e| {
        tracing::error!(error = %e, "invalid allowed_origins");
        std::process::exit(1);
    });
    let app = versesync::router(SyncService::new(store), cfg.max_body_bytes).layer(cors);

    let address = cfg.get_address();
    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    let cancellation_token = CancellationToken::new();
    let shutdown_token = cancellation_token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
        }
        shutdown_token.cancel();
    });

    tracing::info!("versesync.svc running on {}", &address);
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(cancellation_token.cancelled_owned())
        .await
    {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }
}
