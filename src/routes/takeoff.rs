//! Floor-plan takeoff endpoints.
//!
//! Synchronous analysis returns the batch result directly; long batches go
//! through `/v1/takeoff/batches` and are polled.

use axum::{
    extract::{Multipart, Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{read_documents, read_single_document, Accepted, DataResponse};
use crate::app::AppState;
use crate::domain::batch::BatchCreated;
use crate::domain::takeoff::AggregateResult;
use crate::error::{ApiError, ApiResult};
use crate::middleware::request_id::request_id;
use crate::services::aggregator::to_device_count_table;
use crate::services::batches::spawn_batch;

// =============================================================================
// Synchronous analysis
// =============================================================================

/// Run the three-pass analysis over every uploaded sheet.
///
/// POST /v1/takeoff/analyze
pub async fn analyze(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let documents = read_documents(multipart).await?;
    tracing::info!(
        request_id = request_id(&headers).unwrap_or("-"),
        documents = documents.len(),
        "Takeoff analysis requested"
    );

    let result = state
        .analyzer
        .analyze_all(
            &documents,
            |progress| {
                tracing::debug!(
                    current = progress.current,
                    total = progress.total,
                    file = %progress.file_name,
                    "Analyzing sheet"
                )
            },
            &CancellationToken::new(),
        )
        .await;

    Ok(Json(DataResponse::new(result)))
}

/// Single-pass preview count of one sheet.
///
/// POST /v1/takeoff/quick
pub async fn quick(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let document = read_single_document(multipart).await?;
    let result = state.analyzer.analyze_quick(&document).await?;
    Ok(Json(DataResponse::new(result)))
}

/// Convert a batch result into the bill-of-materials device table.
///
/// POST /v1/takeoff/device-counts
pub async fn device_counts(Json(result): Json<AggregateResult>) -> ApiResult<impl IntoResponse> {
    Ok(Json(DataResponse::new(to_device_count_table(&result))))
}

// =============================================================================
// Background batches
// =============================================================================

/// POST /v1/takeoff/batches
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let documents = read_documents(multipart).await?;
    let total = documents.len();
    let batch_id = spawn_batch(state.batches.clone(), state.analyzer.clone(), documents);

    Ok(Accepted(BatchCreated { batch_id, total }))
}

/// GET /v1/takeoff/batches/:batch_id
pub async fn get_batch(
    Path(batch_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .batches
        .snapshot(batch_id)
        .ok_or_else(|| ApiError::NotFound(format!("Batch {} not found", batch_id)))?;
    Ok(Json(DataResponse::new(snapshot)))
}

/// Request cancellation; already-finished batches are left untouched.
///
/// DELETE /v1/takeoff/batches/:batch_id
pub async fn cancel_batch(
    Path(batch_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    state
        .batches
        .cancel(batch_id)
        .ok_or_else(|| ApiError::NotFound(format!("Batch {} not found", batch_id)))?;
    tracing::info!(batch_id = %batch_id, "Batch cancellation requested");

    let snapshot = state
        .batches
        .snapshot(batch_id)
        .ok_or_else(|| ApiError::NotFound(format!("Batch {} not found", batch_id)))?;
    Ok(Json(DataResponse::new(snapshot)))
}
