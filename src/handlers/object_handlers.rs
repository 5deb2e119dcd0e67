//! HTTP handlers for object record operations.
//! Bytes never pass through here; responses carry signed URLs for the
//! storage gateway and everything else is delegated to `ObjectService`.

use crate::{
    errors::AppError,
    models::{
        caller::Caller,
        object::{ObjectMetadata, ObjectUpdate, ObjectView},
    },
    services::{
        metadata_store::ListFilter,
        object_service::{ListPage, ListParams, ObjectService},
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

/// Body of `POST /objects`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegisterReq {
    pub sha256sum: String,
    #[serde(flatten)]
    pub metadata: ObjectMetadata,
    /// Link to another owner's identical bytes instead of uploading.
    #[serde(default)]
    pub auto_link: bool,
}

/// Query params accepted by `GET /objects/{sha}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetchQuery {
    #[serde(default)]
    pub auto_link: bool,
}

/// Query params accepted by `GET /objects`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ListQuery {
    pub objectname: Option<String>,
    pub prefix: Option<String>,
    pub mime_type: Option<String>,
    pub sha256sum: Option<String>,
    pub linked: Option<bool>,
    pub max_keys: Option<usize>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ListResp {
    pub objects: Vec<ObjectView>,
    pub key_count: usize,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// `POST /objects`: register content; 201 when new, 200 when already known.
pub async fn register_object(
    State(service): State<ObjectService>,
    caller: Caller,
    Json(req): Json<RegisterReq>,
) -> Result<impl IntoResponse, AppError> {
    let registered = service
        .register(&caller, &req.sha256sum, req.metadata, req.auto_link)
        .await?;
    let status = if registered.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(service.to_response(&registered.granted))))
}

/// `GET /objects/{sha}`: record plus signed URLs.
pub async fn get_object(
    State(service): State<ObjectService>,
    caller: Caller,
    Path(sha): Path<String>,
    Query(q): Query<FetchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let granted = service.fetch(&caller, &sha, q.auto_link).await?;
    Ok(Json(service.to_response(&granted)))
}

/// `PUT /objects/{sha}`: update metadata or move to new content.
pub async fn update_object(
    State(service): State<ObjectService>,
    caller: Caller,
    Path(sha): Path<String>,
    Json(update): Json<ObjectUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let granted = service.update(&caller, &sha, update).await?;
    Ok(Json(service.to_response(&granted)))
}

/// `DELETE /objects/{sha}`: soft-delete.
pub async fn delete_object(
    State(service): State<ObjectService>,
    caller: Caller,
    Path(sha): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.delete(&caller, &sha).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /objects`: list the caller's records.
pub async fn list_objects(
    State(service): State<ObjectService>,
    caller: Caller,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let params = list_params(q);
    let page = service.list(&caller, params).await?;
    Ok(Json(list_response(page)))
}

fn list_params(q: ListQuery) -> ListParams {
    ListParams {
        filter: ListFilter {
            objectname: q.objectname,
            name_prefix: q.prefix,
            mime_type: q.mime_type,
            sha256sum: q.sha256sum,
            linked: q.linked,
            ..Default::default()
        },
        continuation_token: q.continuation_token.as_deref().map(decode_continuation_token),
        max_keys: q.max_keys,
    }
}

fn list_response(page: ListPage) -> ListResp {
    let objects: Vec<ObjectView> = page.objects.iter().map(ObjectView::from).collect();
    ListResp {
        key_count: objects.len(),
        objects,
        is_truncated: page.is_truncated,
        next_continuation_token: page
            .next_continuation_token
            .as_deref()
            .map(encode_continuation_token),
    }
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}
