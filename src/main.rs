use anyhow::{Context, Result};
use std::sync::Arc;

use lv_takeoff::{
    app::{create_app, AppState},
    config::Settings,
    logging::init_logging,
    services::{GeminiClient, ModelGateway},
};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real deployments set variables directly
    dotenvy::dotenv().ok();

    // Refuses to start without a usable GEMINI_API_KEY
    let settings = Settings::from_env()?;
    init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        model = %settings.gemini_model,
        batch_concurrency = settings.batch_concurrency,
        prefer_overcount = settings.prefer_overcount,
        "Starting LV takeoff backend"
    );

    let gateway: Arc<dyn ModelGateway> = Arc::new(GeminiClient::new(&settings)?);
    spawn_startup_probe(gateway.clone());

    let listener = tokio::net::TcpListener::bind(&settings.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.server_addr))?;
    tracing::info!(addr = %settings.server_addr, "Listening");

    let app = create_app(AppState::new(settings, gateway));
    axum::serve(listener, app).await?;

    Ok(())
}

/// Probes the model service in the background so a slow or failing API
/// never delays startup.
fn spawn_startup_probe(gateway: Arc<dyn ModelGateway>) {
    tokio::spawn(async move {
        match gateway.health_check().await {
            Ok(()) => tracing::info!("Model service is reachable"),
            Err(e) => tracing::warn!(error = %e, "Model service unreachable at startup"),
        }
    });
}
