use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crop_predictor::{router, AppState, ModelHandle, ModelStore, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = ServiceConfig::from_env()?;
    let store = ModelStore::from_config(&cfg);

    // Without a model there is nothing to serve
    let model = store.load_or_train().with_context(|| {
        format!("failed to initialize model (dataset {})", cfg.dataset_path.display())
    })?;

    tracing::info!(
        "model ready: accuracy {:.2}%, {} crops supported",
        model.report.accuracy,
        model.labels.len()
    );

    let addr = format!("{}:{}", cfg.bind_addr, cfg.port);
    let state = AppState::new(ModelHandle::new(model), store, cfg);
    let app = router(state);

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}
