//! Multipart upload extraction.

use axum::extract::Multipart;

use crate::domain::takeoff::Document;
use crate::error::{ApiError, ApiResult};

/// Reads every file part of a multipart body into a [`Document`], in order.
///
/// Parts without a file name are ignored so forms can carry extra fields.
pub async fn read_documents(mut multipart: Multipart) -> ApiResult<Vec<Document>> {
    let mut documents = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let media_type = field.content_type().map(str::to_string);
        let content = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read {}: {}", file_name, e)))?;

        if content.is_empty() {
            return Err(ApiError::BadRequest(format!("{} is empty", file_name)));
        }

        tracing::debug!(file = %file_name, bytes = content.len(), "Received upload");
        documents.push(Document::new(file_name, content.to_vec(), media_type));
    }

    if documents.is_empty() {
        return Err(ApiError::BadRequest("No files uploaded".to_string()));
    }
    Ok(documents)
}

/// Like [`read_documents`] but requires exactly one file.
pub async fn read_single_document(multipart: Multipart) -> ApiResult<Document> {
    let mut documents = read_documents(multipart).await?;
    if documents.len() != 1 {
        return Err(ApiError::BadRequest(format!(
            "Expected exactly one file, got {}",
            documents.len()
        )));
    }
    Ok(documents.remove(0))
}
