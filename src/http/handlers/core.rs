use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::http::error::ApiError;
use crate::ledger::LedgerError;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn route_not_found() -> Response {
    ApiError(LedgerError::not_found("Route not found.")).into_response()
}

pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "success": false,
            "kind": "validation",
            "message": "Method not allowed.",
        })),
    )
        .into_response()
}
