//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata store and staging disk I/O

use crate::services::upload_service::UploadService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe; always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Asks the metadata store whether it is reachable.
/// 2. Performs a write/read/delete round trip in the staging directory.
///
/// The object store is not probed; signing works offline and writes are
/// only attempted on real uploads.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    // 1) Metadata store check
    let metadata_check = match service.metadata.check_ready().await {
        Ok(()) => (true, None::<String>),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    // 2) Staging disk check
    let tmp_path = service
        .staging_dir
        .join(format!(".readyz-{}", Uuid::new_v4()));
    let disk_check = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                Ok(_) => (true, None::<String>),
                Err(e) => (true, Some(format!("could not remove tmp file: {}", e))),
            },
            Ok(_) => {
                let _ = fs::remove_file(&tmp_path).await;
                (false, Some("file content mismatch".to_string()))
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                (false, Some(format!("could not read tmp file: {}", e)))
            }
        },
        Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
    };

    let overall_ok = metadata_check.0 && disk_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "metadata",
        CheckStatus {
            ok: metadata_check.0,
            error: metadata_check.1,
        },
    );
    checks.insert(
        "staging",
        CheckStatus {
            ok: disk_check.0,
            error: disk_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use crate::{
        routes::routes::routes,
        services::{
            metadata_store::JsonLinesMetadataStore, object_store::testing::RecordingObjectStore,
            upload_service::UploadService,
        },
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::{path::Path, sync::Arc};
    use tower::ServiceExt;

    fn service(staging_dir: &Path, records: &Path) -> UploadService {
        UploadService::new(
            Arc::new(RecordingObjectStore::default()),
            Arc::new(JsonLinesMetadataStore::new(records)),
            staging_dir,
            "sample-folder-1",
            900,
        )
    }

    async fn status_of(service: UploadService, uri: &str) -> StatusCode {
        routes(1024)
            .with_state(service)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn ready_when_staging_is_writable() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), &dir.path().join("records.jsonl"));

        assert_eq!(status_of(svc.clone(), "/healthz").await, StatusCode::OK);
        assert_eq!(status_of(svc, "/readyz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn not_ready_when_staging_dir_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir.path().join("absent"), &dir.path().join("records.jsonl"));

        assert_eq!(
            status_of(svc, "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
