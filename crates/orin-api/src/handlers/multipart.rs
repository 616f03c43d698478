use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use tracing::debug;

use crate::services::document_service::{UploadMetadata, UploadedFile};
use crate::utils::error::{ApiError, ApiResult};

/// Files plus the shared metadata fields of an upload form.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<UploadedFile>,
    pub metadata: UploadMetadata,
}

fn form_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(format!("Invalid multipart body: {}", e.body_text()))
    }
}

async fn text(field: Field<'_>) -> ApiResult<Option<String>> {
    let value = field.text().await.map_err(form_error)?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}

/// Read a multipart upload. Every field named in `file_fields` carries one
/// file; `tags` is a comma separated list.
pub async fn read_upload_form(mut multipart: Multipart, file_fields: &[&str]) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if file_fields.contains(&name.as_str()) {
            let filename = field
                .file_name()
                .map(str::to_string)
                .filter(|f| !f.trim().is_empty())
                .ok_or_else(|| ApiError::BadRequest(format!("Field '{name}' has no filename")))?;
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.map_err(form_error)?;
            debug!("Received '{}' ({} bytes, {:?})", filename, data.len(), content_type);
            form.files.push(UploadedFile {
                filename,
                content_type,
                data,
            });
            continue;
        }

        match name.as_str() {
            "department" => form.metadata.department = text(field).await?,
            "document_type" => form.metadata.document_type = text(field).await?,
            "description" => form.metadata.description = text(field).await?,
            "tags" => {
                if let Some(tags) = text(field).await? {
                    form.metadata
                        .tags
                        .extend(tags.split(',').map(str::trim).filter(|t| !t.is_empty()).map(str::to_string));
                }
            }
            other => debug!("Ignoring form field '{}'", other),
        }
    }

    if form.files.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Missing file field ({})",
            file_fields.join(" or ")
        )));
    }
    Ok(form)
}
