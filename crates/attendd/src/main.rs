use anyhow::{Context, Result};
use attend_core::ModelEmbedder;
use attendd::config::Config;
use attendd::engine::spawn_engine;
use attendd::service::AttendanceService;
use attendd::store::Store;
use attendd::{build_router, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        listen = %config.listen_addr,
        model_dir = %config.model_dir.display(),
        db = %config.db_path.display(),
        camera = %config.camera_device,
        "attendd starting"
    );

    let embedder = ModelEmbedder::load(&config.model_dir)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;
    let engine = spawn_engine(embedder)?;
    let store = Store::open(&config.db_path).await?;

    let service = AttendanceService::new(store, engine, config.page_size);
    let app = build_router(AppState::new(service, &config));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "attendd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("attendd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
