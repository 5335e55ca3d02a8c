//! Axum handlers.
//!
//! Validation failures map to 400; every other engine failure is logged and
//! mapped to an opaque 500.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

use crate::contact::{IdentifyRequest, Submission};
use crate::error::ReconcileError;

use super::HttpState;

/// GET /
pub(super) async fn health() -> Response {
    let body = json!({
        "status": "ok",
        "message": "Contact reconciliation service",
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// POST /identify
pub(super) async fn identify(
    State(state): State<HttpState>,
    Json(req): Json<IdentifyRequest>,
) -> Response {
    let result = match Submission::try_from(req) {
        Ok(submission) => state.service.identify(submission).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(view) => (StatusCode::OK, Json(json!({ "contact": view }))).into_response(),
        Err(ReconcileError::Validation(msg)) => {
            warn!("identify rejected: {msg}");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
        }
        Err(e) => {
            error!(retryable = e.is_retryable(), "identify failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            )
                .into_response()
        }
    }
}
