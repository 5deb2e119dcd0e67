//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata store and the storage backend

use crate::services::object_service::ObjectService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
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
/// 1. Runs `SELECT 1` against the metadata store.
/// 2. Asks the storage backend about a random storage id, which must answer
///    (with "absent") within the call deadline.
///
/// HTTP 200 when both checks pass, HTTP 503 otherwise.
pub async fn readyz(State(service): State<ObjectService>) -> impl IntoResponse {
    let metadata_check = match service.store().ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    let probe_id = Uuid::new_v4().simple().to_string();
    let backend_check = match service.files().exists(&probe_id).await {
        Ok(false) => CheckStatus::ok(),
        Ok(true) => CheckStatus::failed(format!("unexpected object at {}", probe_id)),
        Err(e) => CheckStatus::failed(format!("{}: {}", service.files().describe(), e)),
    };

    let overall_ok = metadata_check.ok && backend_check.ok;

    let mut checks = HashMap::new();
    checks.insert("metadata", metadata_check);
    checks.insert("backend", backend_check);

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

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
