//! Gemini client: resumable PDF upload plus single-shot `generateContent`.
//!
//! Provides:
//! - Inline base64 payloads for images
//! - Resumable upload with status polling for PDFs, falling back to inline
//!   encoding when the upload session cannot be established
//! - Prompt + payload generation returning raw model text

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Settings;
use crate::domain::takeoff::{Document, PreparedPayload};
use crate::error::GatewayError;
use crate::services::gateway::{encode_inline, ModelGateway};

const MAX_OUTPUT_TOKENS: u32 = 16_384;
const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";
const HEALTH_PROMPT: &str = "Say \"API connected successfully\"";

/// Client for the Gemini generative language API.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_base: String,
    upload_base: String,
    model: String,
    api_key: String,
    poll_interval: Duration,
    poll_max_attempts: u32,
}

/// Remote file metadata returned by the Files API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

impl RemoteFile {
    fn state(&self) -> &str {
        self.state.as_deref().unwrap_or("STATE_UNSPECIFIED")
    }

    fn is_processing(&self) -> bool {
        self.state() == "PROCESSING"
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    Text(&'a str),
    InlineData {
        #[serde(rename = "mimeType")]
        mime_type: &'a str,
        data: &'a str,
    },
    FileData {
        #[serde(rename = "mimeType")]
        mime_type: &'a str,
        #[serde(rename = "fileUri")]
        file_uri: &'a str,
    },
}

impl<'a> From<&'a PreparedPayload> for Part<'a> {
    fn from(payload: &'a PreparedPayload) -> Self {
        match payload {
            PreparedPayload::Inline { mime_type, data_base64 } => Part::InlineData {
                mime_type,
                data: data_base64,
            },
            PreparedPayload::Uploaded { mime_type, file_uri } => Part::FileData { mime_type, file_uri },
        }
    }
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Text of the first candidate's first part.
fn first_candidate_text(response: GenerateResponse) -> Result<String, GatewayError> {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .filter(|t| !t.trim().is_empty())
        .ok_or(GatewayError::EmptyResponse)
}

async fn status_error(response: Response) -> GatewayError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    GatewayError::Status { status, body }
}

impl GeminiClient {
    /// Create a new Gemini client from settings.
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.gemini_timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        info!(model = %settings.gemini_model, "Gemini client initialized");

        Ok(Self {
            client,
            api_base: settings.gemini_api_base.trim_end_matches('/').to_string(),
            upload_base: settings.gemini_upload_base.trim_end_matches('/').to_string(),
            model: settings.gemini_model.clone(),
            api_key: settings.gemini_api_key.clone(),
            poll_interval: settings.upload_poll_interval(),
            poll_max_attempts: settings.upload_poll_max_attempts,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    fn file_url(&self, name: &str) -> String {
        let id = name.trim_start_matches("files/");
        format!("{}/files/{}", self.api_base, id)
    }

    async fn generate_content(&self, parts: Vec<Part<'_>>, temperature: f32) -> Result<String, GatewayError> {
        let request = GenerateRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let response = self
            .client
            .post(self.generate_url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Model request failed");
                GatewayError::from(e)
            })?;

        if !response.status().is_success() {
            let err = status_error(response).await;
            error!(error = %err, "Model service error");
            return Err(err);
        }

        let body = response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let text = first_candidate_text(body)?;
        debug!(response_len = text.len(), "Model response received");
        Ok(text)
    }

    // =========================================================================
    // Resumable upload
    // =========================================================================

    /// Opens an upload session and returns the session URL.
    async fn start_upload_session(&self, document: &Document) -> Result<String, GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct FileMeta<'a> {
            display_name: &'a str,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            file: FileMeta<'a>,
        }

        let response = self
            .client
            .post(format!("{}/files", self.upload_base))
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", document.size().to_string())
            .header("X-Goog-Upload-Header-Content-Type", document.mime_type())
            .json(&Request {
                file: FileMeta {
                    display_name: &document.name,
                },
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        response
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Upload("upload session returned no upload URL".to_string()))
    }

    async fn send_bytes(&self, upload_url: &str, document: &Document) -> Result<RemoteFile, GatewayError> {
        let response = self
            .client
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(document.content.clone())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        response
            .json::<UploadResponse>()
            .await
            .map(|r| r.file)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    async fn file_status(&self, name: &str) -> Result<RemoteFile, GatewayError> {
        let response = self
            .client
            .get(self.file_url(name))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        response
            .json::<RemoteFile>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    /// Polls until the remote file leaves `PROCESSING` or the budget runs out.
    async fn wait_until_active(&self, mut file: RemoteFile) -> Result<RemoteFile, GatewayError> {
        let mut attempts = 0;
        while file.is_processing() && attempts < self.poll_max_attempts {
            debug!(file = %file.name, attempt = attempts + 1, "Waiting for PDF processing");
            tokio::time::sleep(self.poll_interval).await;

            match self.file_status(&file.name).await {
                Ok(latest) => file = latest,
                // A failed status check just costs one attempt
                Err(e) => warn!(file = %file.name, error = %e, "File status check failed"),
            }
            attempts += 1;
        }

        match file.state() {
            "ACTIVE" => Ok(file),
            "PROCESSING" => Err(GatewayError::ProcessingTimeout { attempts }),
            other => Err(GatewayError::Upload(format!(
                "File processing failed. State: {}",
                other
            ))),
        }
    }

    #[instrument(skip(self, document), fields(document = %document.name, bytes = document.size()))]
    async fn upload(&self, document: &Document) -> Result<PreparedPayload, GatewayError> {
        let upload_url = self.start_upload_session(document).await?;
        let uploaded = self.send_bytes(&upload_url, document).await?;
        debug!(file = %uploaded.name, state = uploaded.state(), "File uploaded");

        let ready = self.wait_until_active(uploaded).await?;
        let file_uri = ready
            .uri
            .clone()
            .ok_or_else(|| GatewayError::Upload("uploaded file has no URI".to_string()))?;

        info!(file_uri = %file_uri, "PDF ready for analysis");
        Ok(PreparedPayload::Uploaded {
            mime_type: ready
                .mime_type
                .unwrap_or_else(|| document.mime_type().to_string()),
            file_uri,
        })
    }
}

#[async_trait]
impl ModelGateway for GeminiClient {
    async fn prepare_payload(&self, document: &Document) -> Result<PreparedPayload, GatewayError> {
        if !document.is_pdf() {
            return Ok(encode_inline(document));
        }

        match self.upload(document).await {
            Ok(payload) => Ok(payload),
            Err(e @ GatewayError::ProcessingTimeout { .. }) => {
                error!(document = %document.name, error = %e, "PDF processing timed out");
                Err(e)
            }
            Err(e) => {
                warn!(
                    document = %document.name,
                    error = %e,
                    "PDF upload failed, falling back to inline encoding"
                );
                Ok(encode_inline(document))
            }
        }
    }

    #[instrument(skip(self, prompt, payload), fields(prompt_len = prompt.len(), inline = payload.is_inline()))]
    async fn generate(
        &self,
        prompt: &str,
        payload: &PreparedPayload,
        temperature: f32,
    ) -> Result<String, GatewayError> {
        self.generate_content(vec![Part::Text(prompt), Part::from(payload)], temperature)
            .await
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        let reply = self
            .generate_content(vec![Part::Text(HEALTH_PROMPT)], 0.0)
            .await?;
        debug!(reply = %reply.trim(), "Model service reachable");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inline_part_serialization() {
        let payload = PreparedPayload::Inline {
            mime_type: "image/png".into(),
            data_base64: "AAAA".into(),
        };
        let value = serde_json::to_value(Part::from(&payload)).unwrap();
        assert_eq!(value, json!({"inlineData": {"mimeType": "image/png", "data": "AAAA"}}));
    }

    #[test]
    fn test_file_part_serialization() {
        let payload = PreparedPayload::Uploaded {
            mime_type: "application/pdf".into(),
            file_uri: "https://example.test/files/abc".into(),
        };
        let value = serde_json::to_value(Part::from(&payload)).unwrap();
        assert_eq!(
            value,
            json!({"fileData": {"mimeType": "application/pdf", "fileUri": "https://example.test/files/abc"}})
        );
        assert_eq!(serde_json::to_value(Part::Text("hi")).unwrap(), json!({"text": "hi"}));
    }

    #[test]
    fn test_generation_config_field_names() {
        let value = serde_json::to_value(GenerationConfig {
            temperature: 0.5,
            max_output_tokens: MAX_OUTPUT_TOKENS,
        })
        .unwrap();
        assert_eq!(value, json!({"temperature": 0.5, "maxOutputTokens": 16384}));
    }

    #[test]
    fn test_first_candidate_text() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "{\"a\": 1}"}]}}]
        }))
        .unwrap();
        assert_eq!(first_candidate_text(response).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_missing_or_blank_text_is_empty_response() {
        for body in [
            json!({}),
            json!({"candidates": []}),
            json!({"candidates": [{"finishReason": "SAFETY"}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "  "}]}}]}),
        ] {
            let response: GenerateResponse = serde_json::from_value(body).unwrap();
            assert!(matches!(
                first_candidate_text(response),
                Err(GatewayError::EmptyResponse)
            ));
        }
    }

    #[test]
    fn test_remote_file_state() {
        let file: RemoteFile = serde_json::from_value(json!({
            "name": "files/abc", "uri": "u", "mimeType": "application/pdf", "state": "PROCESSING"
        }))
        .unwrap();
        assert!(file.is_processing());
        let file: RemoteFile = serde_json::from_value(json!({"name": "files/abc"})).unwrap();
        assert_eq!(file.state(), "STATE_UNSPECIFIED");
    }

    mod http {
        use super::*;
        use axum::{
            http::{HeaderMap, StatusCode},
            routing::{get, post},
            Json, Router,
        };
        use tokio::net::TcpListener;

        async fn bind() -> (TcpListener, String) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            (listener, base)
        }

        fn serve(listener: TcpListener, router: Router) {
            tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        }

        fn client(base: &str) -> GeminiClient {
            GeminiClient::new(&Settings::for_tests(base)).unwrap()
        }

        fn pdf() -> Document {
            Document::new("E1.01.pdf", b"%PDF-1.7".to_vec(), None)
        }

        /// Upload session and byte transfer succeed; status polls report `state`.
        fn upload_router(base: &str, state: &'static str) -> Router {
            let session_url = format!("{}/upload-session", base);
            Router::new()
                .route(
                    "/upload/files",
                    post(move || {
                        let session_url = session_url.clone();
                        async move { [(UPLOAD_URL_HEADER, session_url)] }
                    }),
                )
                .route(
                    "/upload-session",
                    post(|| async {
                        Json(json!({"file": {"name": "files/abc", "state": "PROCESSING"}}))
                    }),
                )
                .route(
                    "/files/:id",
                    get(move || async move {
                        Json(json!({
                            "name": "files/abc",
                            "uri": "https://files.test/abc",
                            "mimeType": "application/pdf",
                            "state": state
                        }))
                    }),
                )
        }

        #[tokio::test]
        async fn test_pdf_upload_becomes_file_reference() {
            let (listener, base) = bind().await;
            serve(listener, upload_router(&base, "ACTIVE"));

            let payload = client(&base).prepare_payload(&pdf()).await.unwrap();
            assert_eq!(
                payload,
                PreparedPayload::Uploaded {
                    mime_type: "application/pdf".into(),
                    file_uri: "https://files.test/abc".into(),
                }
            );
        }

        #[tokio::test]
        async fn test_failed_upload_falls_back_to_inline() {
            let (listener, base) = bind().await;
            serve(
                listener,
                Router::new().route(
                    "/upload/files",
                    post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upload backend down") }),
                ),
            );

            let payload = client(&base).prepare_payload(&pdf()).await.unwrap();
            assert_eq!(payload, encode_inline(&pdf()));
            assert_eq!(payload.mime_type(), "application/pdf");
        }

        #[tokio::test]
        async fn test_file_stuck_processing_times_out() {
            let (listener, base) = bind().await;
            serve(listener, upload_router(&base, "PROCESSING"));

            let err = client(&base).prepare_payload(&pdf()).await.unwrap_err();
            assert!(matches!(err, GatewayError::ProcessingTimeout { attempts: 2 }));
        }

        #[tokio::test]
        async fn test_error_status_is_reported_with_body() {
            let (listener, base) = bind().await;
            serve(
                listener,
                Router::new().route(
                    "/models/:call",
                    post(|| async { (StatusCode::TOO_MANY_REQUESTS, "quota exhausted") }),
                ),
            );

            let err = client(&base)
                .generate("count", &encode_inline(&pdf()), 0.1)
                .await
                .unwrap_err();
            match err {
                GatewayError::Status { status, body } => {
                    assert_eq!(status, 429);
                    assert_eq!(body, "quota exhausted");
                }
                other => panic!("expected status error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_no_candidates_is_empty_response() {
            let (listener, base) = bind().await;
            serve(
                listener,
                Router::new().route(
                    "/models/:call",
                    post(|| async { Json(json!({"candidates": []})) }),
                ),
            );

            let err = client(&base)
                .generate("count", &encode_inline(&pdf()), 0.1)
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::EmptyResponse));
        }

        #[tokio::test]
        async fn test_generate_sends_key_header_and_returns_text() {
            let (listener, base) = bind().await;
            serve(
                listener,
                Router::new().route(
                    "/models/:call",
                    post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                        if headers.get(API_KEY_HEADER).map(|v| v.as_bytes()) != Some(b"test-key".as_slice()) {
                            return (StatusCode::UNAUTHORIZED, Json(json!({})));
                        }
                        let parts = &body["contents"][0]["parts"];
                        let echoed = format!(
                            "{}|{}",
                            parts[0]["text"].as_str().unwrap_or_default(),
                            parts[1]["inlineData"]["mimeType"].as_str().unwrap_or_default()
                        );
                        (
                            StatusCode::OK,
                            Json(json!({"candidates": [{"content": {"parts": [{"text": echoed}]}}]})),
                        )
                    }),
                ),
            );

            let text = client(&base)
                .generate("count devices", &encode_inline(&pdf()), 0.1)
                .await
                .unwrap();
            assert_eq!(text, "count devices|application/pdf");
        }
    }
}
