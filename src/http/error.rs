use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::ledger::LedgerError;

pub type ApiResult<T> = Result<T, ApiError>;

/// A ledger failure on its way out as a `{success: false, kind, message}` body.
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(LedgerError::validation(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(LedgerError::validation(format!(
            "Invalid query string: {}",
            rejection.body_text()
        )))
    }
}

pub fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        LedgerError::Validation(_)
        | LedgerError::InvalidArgument(_)
        | LedgerError::AlreadyPaid(_)
        | LedgerError::NoOp(_)
        | LedgerError::Consistency(_)
        | LedgerError::InvalidState(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = match &self.0 {
            LedgerError::Internal(e) => {
                error!("request failed: {e:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = json!({
            "success": false,
            "kind": self.0.kind(),
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}

/// Success envelope. `data` is serialized as-is.
pub fn success<T: Serialize>(
    status: StatusCode,
    message: Option<&str>,
    data: &T,
) -> ApiResult<Response> {
    let data = serde_json::to_value(data).map_err(|e| LedgerError::Internal(e.into()))?;
    Ok((status, Json(envelope(message, data))).into_response())
}

pub fn envelope(message: Option<&str>, data: Value) -> Value {
    let mut body = json!({ "success": true, "data": data });
    if let Some(m) = message {
        body["message"] = Value::String(m.to_string());
    }
    body
}
