use axum::{
    extract::{Multipart, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::{read_single_document, DataResponse};
use crate::app::AppState;
use crate::domain::specification::SpecificationResult;
use crate::domain::takeoff::DeviceCount;
use crate::error::ApiResult;
use crate::services::specification::{cross_reference, parse_specification};

#[derive(Debug, Deserialize)]
pub struct CrossReferenceRequest {
    pub specification: SpecificationResult,
    /// Plan totals, usually `totals_by_system` from a takeoff.
    pub totals: DeviceCount,
}

/// POST /v1/specifications/analyze
pub async fn analyze_specification(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let document = read_single_document(multipart).await?;
    let analyzer = &state.analyzer;
    let spec = parse_specification(
        analyzer.gateway().as_ref(),
        &document,
        analyzer.settings().temperature,
    )
    .await?;
    Ok(Json(DataResponse::new(spec)))
}

/// POST /v1/specifications/cross-reference
pub async fn cross_reference_specification(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CrossReferenceRequest>,
) -> ApiResult<impl IntoResponse> {
    let result = cross_reference(
        &req.specification,
        &req.totals,
        &state.analyzer.settings().thresholds,
    );
    Ok(Json(DataResponse::new(result)))
}
