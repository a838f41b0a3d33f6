use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    Router,
};
use std::{sync::Arc, time::Duration};
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::config::Settings;
use crate::middleware::{request_id_layer, X_REQUEST_ID};
use crate::routes;
use crate::services::{BatchRegistry, ModelGateway, TakeoffAnalyzer};

/// State handed to every handler.
pub struct AppState {
    pub settings: Settings,
    pub analyzer: Arc<TakeoffAnalyzer>,
    /// Background batches started through `/v1/takeoff/batches`
    pub batches: Arc<BatchRegistry>,
}

impl AppState {
    pub fn new(settings: Settings, gateway: Arc<dyn ModelGateway>) -> Arc<Self> {
        let analyzer = TakeoffAnalyzer::new(gateway, settings.analysis());
        let batches = BatchRegistry::new(settings.batch_retention());
        Arc::new(Self {
            settings,
            analyzer: Arc::new(analyzer),
            batches: Arc::new(batches),
        })
    }
}

/// Router with the takeoff API and its middleware stack.
///
/// Axum's default 2 MB body cap is replaced by `max_upload_bytes`, since
/// plan sets are routinely tens of megabytes.
pub fn create_app(state: Arc<AppState>) -> Router {
    let (set_request_id, propagate_request_id) = request_id_layer();
    let upload_limit = RequestBodyLimitLayer::new(state.settings.max_upload_bytes);
    let cors = cors_layer(&state.settings);

    // Outermost layer is added last.
    Router::new()
        .merge(routes::api_router())
        .layer(DefaultBodyLimit::disable())
        .layer(upload_limit)
        .layer(propagate_request_id)
        .layer(trace_layer())
        .layer(set_request_id)
        .layer(cors)
        .with_state(state)
}

/// Spans at DEBUG, completed responses at INFO.
fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    let preflight_cache = if settings.env.is_dev() {
        Duration::from_secs(24 * 60 * 60)
    } else {
        Duration::from_secs(60 * 60)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(X_REQUEST_ID),
        ]))
        .max_age(preflight_cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::services::passes::test_support::ScriptedGateway;

    fn app() -> Router {
        create_app(AppState::new(
            Settings::for_tests("http://localhost"),
            Arc::new(ScriptedGateway::default()),
        ))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_model_service() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["model_service"], "ok");
    }

    #[tokio::test]
    async fn test_caller_request_id_is_echoed() {
        let response = app()
            .oneshot(
                Request::get("/health")
                    .header(X_REQUEST_ID, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[X_REQUEST_ID], "req-42");
    }

    #[tokio::test]
    async fn test_device_counts_from_posted_result() {
        let payload = serde_json::json!({
            "totals_by_system": {
                "CABLING": { "Data Outlet": 4 },
                "PAGING": { "Ceiling Speaker": 2 }
            }
        });
        let response = app()
            .oneshot(
                Request::post("/v1/takeoff/device-counts")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["CABLING"]["data_outlet"]["qty"], 4);
        assert_eq!(body["data"]["OTHER"]["ceiling_speaker"]["qty"], 2);
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found() {
        let uri = format!("/v1/takeoff/batches/{}", uuid::Uuid::new_v4());
        let response = app()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
