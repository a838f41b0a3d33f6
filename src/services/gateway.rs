//! Seam between the analysis passes and whichever vision model backs them.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::domain::takeoff::{Document, PreparedPayload};
use crate::error::GatewayError;

/// A vision-capable text generator.
///
/// Implementations must not retry; callers own retry policy. The only
/// adaptive behaviour allowed is falling back to inline encoding when a
/// remote upload cannot be set up.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Turns a document into something `generate` can reference.
    async fn prepare_payload(&self, document: &Document) -> Result<PreparedPayload, GatewayError>;

    /// One prompt + payload call, returning the model's raw text.
    async fn generate(
        &self,
        prompt: &str,
        payload: &PreparedPayload,
        temperature: f32,
    ) -> Result<String, GatewayError>;

    /// Cheap reachability/credential check.
    async fn health_check(&self) -> Result<(), GatewayError>;
}

/// Base64-encodes the whole document for inline transmission.
pub fn encode_inline(document: &Document) -> PreparedPayload {
    PreparedPayload::Inline {
        mime_type: document.mime_type().to_string(),
        data_base64: STANDARD.encode(&document.content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_encoding_keeps_mime_type() {
        let doc = Document::new("plan.png", b"hello".to_vec(), None);
        match encode_inline(&doc) {
            PreparedPayload::Inline { mime_type, data_base64 } => {
                assert_eq!(mime_type, "image/png");
                assert_eq!(data_base64, "aGVsbG8=");
            }
            other => panic!("expected inline payload, got {other:?}"),
        }
    }

    #[test]
    fn test_inline_pdf_is_sent_as_pdf() {
        let doc = Document::new(
            "E1.01.PDF",
            b"%PDF".to_vec(),
            Some("application/octet-stream".into()),
        );
        assert_eq!(encode_inline(&doc).mime_type(), "application/pdf");

        let jpeg = Document::new("site.jpg", b"jpg".to_vec(), Some("image/jpeg".into()));
        assert_eq!(encode_inline(&jpeg).mime_type(), "image/jpeg");
    }
}
