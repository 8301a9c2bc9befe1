//! HTTP handlers for image upload and retrieval.
//! File bodies are streamed into staging rather than buffered in memory;
//! the workflow itself lives in `UploadService`.

use crate::{
    errors::AppError,
    models::record::UploadRecord,
    services::upload_service::{BodyTooLarge, StagingFile, UploadError, UploadService},
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;

/// Multipart field carrying the file.
const FILE_FIELD: &str = "image";
const DESCRIPTION_FIELD: &str = "description";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    pub record: UploadRecord,
}

/// Query params accepted by `GET /images`.
#[derive(Debug, Deserialize)]
pub struct ListImagesQuery {
    pub name: Option<String>,
}

struct StagedField {
    file: StagingFile,
    original_name: String,
    content_type: String,
}

/// `POST /images`: multipart upload with an `image` file and optional `description`.
pub async fn upload_image(
    State(service): State<UploadService>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut staged: Option<StagedField> = None;
    let mut description: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            // Browsers send an empty filename when no file was chosen.
            Some(FILE_FIELD) if staged.is_none() && has_file_name(field.file_name()) => {
                let original_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();
                let stream = field.map(|chunk| chunk.map_err(body_chunk_error));
                let file = service.stage(stream).await?;
                staged = Some(StagedField {
                    file,
                    original_name,
                    content_type,
                });
            }
            Some(DESCRIPTION_FIELD) => {
                let text = field
                    .text()
                    .await
                    .map_err(multipart_error)?;
                description = Some(text).filter(|text| !text.is_empty());
            }
            _ => {}
        }
    }

    let Some(staged) = staged else {
        return Err(UploadError::MissingFile.into());
    };

    let record = service
        .upload(
            staged.file,
            &staged.original_name,
            &staged.content_type,
            description,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "File uploaded and recorded successfully",
            record,
        }),
    ))
}

fn has_file_name(file_name: Option<&str>) -> bool {
    file_name.is_some_and(|name| !name.is_empty())
}

fn is_too_large(err: &MultipartError) -> bool {
    err.status() == StatusCode::PAYLOAD_TOO_LARGE
}

fn multipart_error(err: MultipartError) -> UploadError {
    if is_too_large(&err) {
        UploadError::TooLarge
    } else {
        UploadError::InvalidBody(err.body_text())
    }
}

fn body_chunk_error(err: MultipartError) -> io::Error {
    if is_too_large(&err) {
        io::Error::new(io::ErrorKind::Other, BodyTooLarge)
    } else {
        io::Error::new(io::ErrorKind::Other, err)
    }
}

/// `GET /images/{handle}`: redirect to a short-lived signed URL.
///
/// `handle` is a record id, or an original file name (earliest upload wins).
pub async fn resolve_image(
    State(service): State<UploadService>,
    Path(handle): Path<String>,
) -> Result<Response, AppError> {
    let retrieval = service.resolve(&handle).await?;
    tracing::debug!(
        record_id = %retrieval.record.id,
        expires_at = %retrieval.expires_at,
        "redirecting to signed url"
    );
    let location = HeaderValue::from_str(&retrieval.url).map_err(|err| {
        tracing::error!("signed url is not a valid header value: {}", err);
        AppError::internal("Internal server error during download generation.")
    })?;

    let mut response = StatusCode::FOUND.into_response();
    let headers = response.headers_mut();
    headers.insert(header::LOCATION, location);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

/// `GET /images`: all records, or those named `?name=`, in upload order.
pub async fn list_images(
    State(service): State<UploadService>,
    Query(q): Query<ListImagesQuery>,
) -> Result<Json<Vec<UploadRecord>>, AppError> {
    let records = match q.name {
        Some(name) => service.search(&name).await?,
        None => service.list().await?,
    };
    Ok(Json(records))
}
