pub mod health;
pub mod specifications;
pub mod takeoff;

use axum::{routing::get, routing::post, Router};
use std::sync::Arc;

use crate::app::AppState;

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        // Takeoff
        .route("/v1/takeoff/analyze", post(takeoff::analyze))
        .route("/v1/takeoff/quick", post(takeoff::quick))
        .route("/v1/takeoff/device-counts", post(takeoff::device_counts))
        .route("/v1/takeoff/batches", post(takeoff::create_batch))
        .route(
            "/v1/takeoff/batches/:batch_id",
            get(takeoff::get_batch).delete(takeoff::cancel_batch),
        )
        // Specifications
        .route(
            "/v1/specifications/analyze",
            post(specifications::analyze_specification),
        )
        .route(
            "/v1/specifications/cross-reference",
            post(specifications::cross_reference_specification),
        )
}
