//! Defines routes for image upload and retrieval.
//!
//! ## Structure
//! - **Health endpoints**
//!   - `GET  /healthz`: liveness
//!   - `GET  /readyz`: readiness (metadata store + staging disk)
//!
//! - **Image endpoints**
//!   - `POST /images`: multipart upload (`image` file, optional `description`)
//!   - `GET  /images`: list records, optionally `?name=` filtered
//!   - `GET  /images/{handle}`: 302 to a signed download URL

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{list_images, resolve_image, upload_image},
    },
    services::upload_service::UploadService,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Build and return the router for all image routes.
///
/// The router carries shared state (`UploadService`) to all handlers.
/// Request bodies larger than `max_upload_bytes` are rejected with 413.
pub fn routes(max_upload_bytes: usize) -> Router<UploadService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // image routes
        .route("/images", get(list_images).post(upload_image))
        .route("/images/{handle}", get(resolve_image))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
