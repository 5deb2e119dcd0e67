//! Defines routes for object record operations.
//!
//! ## Structure
//! - `POST   /objects`      : register content (body carries `sha256sum`)
//! - `GET    /objects`      : list the caller's records (filter via query)
//! - `GET    /objects/{sha}`: fetch record + signed URLs (`?auto-link=true`)
//! - `PUT    /objects/{sha}`: update metadata or content
//! - `DELETE /objects/{sha}`: soft-delete
//!
//! All object routes require the forwarded identity headers
//! (see `handlers::identity`).

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{
            delete_object, get_object, list_objects, register_object, update_object,
        },
    },
    services::object_service::ObjectService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. Handlers share `ObjectService` as state.
pub fn routes() -> Router<ObjectService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/objects", post(register_object).get(list_objects))
        .route(
            "/objects/{sha}",
            get(get_object).put(update_object).delete(delete_object),
        )
}
