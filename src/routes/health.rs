use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::{sync::Arc, time::Instant};

use crate::app::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub model: String,
    pub services: ServiceHealth,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub model_service: &'static str,
    pub model_latency_ms: u128,
}

/// GET /health
///
/// Sends a tiny text prompt to the model service. Any failure reports the
/// service as degraded with 503 so load balancers can route around it.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let started = Instant::now();
    let probe = state.analyzer.gateway().health_check().await;
    let model_latency_ms = started.elapsed().as_millis();

    let (code, status, model_service) = match probe {
        Ok(()) => (StatusCode::OK, "healthy", "ok"),
        Err(e) => {
            tracing::warn!(error = %e, latency_ms = model_latency_ms as u64, "Model service probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", "error")
        }
    };

    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        model: state.settings.gemini_model.clone(),
        services: ServiceHealth {
            model_service,
            model_latency_ms,
        },
    };
    (code, Json(body))
}
