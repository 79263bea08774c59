use anyhow::anyhow;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::api::{PayMultipleRequest, PayRequest, SchoolScope};
use crate::http::error::{envelope, success, ApiError, ApiResult};
use crate::ledger::builder::NewLedger;
use crate::ledger::editor::LedgerEdit;
use crate::ledger::{InstallmentRef, LedgerError, Result};
use crate::service::{require_school_id, FeeService};
use crate::state::AppState;

/// Runs a service call on the blocking pool; SQLite work never sits on an
/// async worker.
async fn run<T, F>(state: AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&FeeService<'_>) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || state.with_service(f))
        .await
        .map_err(|e| LedgerError::Internal(anyhow!("ledger task failed: {e}")))?
        .map_err(ApiError::from)
}

fn school_of(school_id: Option<&str>) -> ApiResult<String> {
    Ok(require_school_id(school_id)?.to_string())
}

pub async fn create_fee(
    State(state): State<AppState>,
    body: std::result::Result<Json<NewLedger>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(input) = body?;
    let ledger = run(state, move |svc| svc.create(input)).await?;
    success(StatusCode::CREATED, None, &ledger)
}

pub async fn get_fee(
    State(state): State<AppState>,
    Path(fee_id): Path<String>,
    query: std::result::Result<Query<SchoolScope>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(scope) = query?;
    let school = school_of(scope.school_id.as_deref())?;
    let ledger = run(state, move |svc| svc.get(&fee_id, &school)).await?;
    success(StatusCode::OK, None, &ledger)
}

pub async fn update_fee(
    State(state): State<AppState>,
    Path(fee_id): Path<String>,
    body: std::result::Result<Json<LedgerEdit>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(edit) = body?;
    let school = school_of(edit.school_id.as_deref())?;
    let ledger = run(state, move |svc| svc.update(&fee_id, &school, &edit)).await?;
    success(StatusCode::OK, Some("Fee updated successfully."), &ledger)
}

/// The tenant may come in the body or, for clients that cannot send a body
/// with DELETE, as `?schoolId=`.
pub async fn delete_fee(
    State(state): State<AppState>,
    Path(fee_id): Path<String>,
    query: std::result::Result<Query<SchoolScope>, QueryRejection>,
    body: Bytes,
) -> ApiResult<Response> {
    let Query(scope) = query?;
    let from_body: SchoolScope = if body.iter().all(u8::is_ascii_whitespace) {
        SchoolScope::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            LedgerError::validation(format!("Invalid request body: {e}"))
        })?
    };
    let school = school_of(from_body.school_id.or(scope.school_id).as_deref())?;
    run(state, move |svc| svc.delete(&fee_id, &school)).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "message": "Fee deleted successfully." })),
    )
        .into_response())
}

pub async fn pay_installment(
    State(state): State<AppState>,
    Path((fee_id, installment)): Path<(String, String)>,
    body: std::result::Result<Json<PayRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = body?;
    let school = school_of(req.school_id.as_deref())?;
    let selector = InstallmentRef::parse(&installment);
    let ledger = run(state, move |svc| {
        svc.pay_installment(&fee_id, &school, &selector, req.payment_method.as_deref())
    })
    .await?;
    success(StatusCode::OK, Some("Installment marked as paid."), &ledger)
}

pub async fn pay_multiple(
    State(state): State<AppState>,
    Path(fee_id): Path<String>,
    body: std::result::Result<Json<PayMultipleRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = body?;
    let school = school_of(req.school_id.as_deref())?;
    let selectors = req.selectors();
    let (ledger, outcome) = run(state, move |svc| {
        svc.pay_multiple(&fee_id, &school, &selectors, req.payment_method.as_deref())
    })
    .await?;

    let message = format!(
        "{} installment(s) updated successfully.",
        outcome.applied_count
    );
    let data = serde_json::to_value(&ledger).map_err(|e| LedgerError::Internal(e.into()))?;
    let outcome = serde_json::to_value(&outcome).map_err(|e| LedgerError::Internal(e.into()))?;
    let mut body = envelope(Some(&message), data);
    body["outcome"] = outcome;
    Ok((StatusCode::OK, Json(body)).into_response())
}

pub async fn receipt(
    State(state): State<AppState>,
    Path((fee_id, installment)): Path<(String, String)>,
    query: std::result::Result<Query<SchoolScope>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(scope) = query?;
    let school = school_of(scope.school_id.as_deref())?;
    let selector = InstallmentRef::parse(&installment);
    let receipt = run(state, move |svc| svc.receipt(&fee_id, &school, &selector)).await?;
    success(StatusCode::OK, None, &receipt)
}
