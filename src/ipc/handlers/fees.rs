use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::api::{PayMultipleRequest, PayRequest, SchoolScope};
use crate::ipc::error::respond;
use crate::ipc::types::Request;
use crate::ledger::builder::NewLedger;
use crate::ledger::editor::LedgerEdit;
use crate::ledger::{InstallmentRef, LedgerError, Result};
use crate::service::require_school_id;
use crate::state::AppState;

fn parse<T: DeserializeOwned>(params: &Value) -> Result<T> {
    let params = if params.is_null() { json!({}) } else { params.clone() };
    serde_json::from_value(params)
        .map_err(|e| LedgerError::validation(format!("invalid params: {e}")))
}

fn fee_id(params: &Value) -> Result<String> {
    params
        .get("feeId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| LedgerError::validation("missing params.feeId"))
}

/// `params.installment` may be a JSON number (a position) or a string
/// (a position or an installment id).
fn installment(params: &Value) -> Result<InstallmentRef> {
    match params.get("installment") {
        Some(Value::Number(n)) => n.as_i64().map(InstallmentRef::Position).ok_or_else(|| {
            LedgerError::InvalidArgument("Invalid installment index.".to_string())
        }),
        Some(Value::String(s)) => Ok(InstallmentRef::parse(s)),
        _ => Err(LedgerError::validation("missing params.installment")),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| LedgerError::Internal(e.into()))
}

fn handle_create(state: &AppState, params: &Value) -> Result<Value> {
    let input: NewLedger = parse(params)?;
    let ledger = state.with_service(|svc| svc.create(input))?;
    to_json(&ledger)
}

fn handle_get(state: &AppState, params: &Value) -> Result<Value> {
    let scope: SchoolScope = parse(params)?;
    let school = require_school_id(scope.school_id.as_deref())?;
    let id = fee_id(params)?;
    let ledger = state.with_service(|svc| svc.get(&id, school))?;
    to_json(&ledger)
}

fn handle_update(state: &AppState, params: &Value) -> Result<Value> {
    let edit: LedgerEdit = parse(params)?;
    let school = require_school_id(edit.school_id.as_deref())?;
    let id = fee_id(params)?;
    let ledger = state.with_service(|svc| svc.update(&id, school, &edit))?;
    to_json(&ledger)
}

fn handle_delete(state: &AppState, params: &Value) -> Result<Value> {
    let scope: SchoolScope = parse(params)?;
    let school = require_school_id(scope.school_id.as_deref())?;
    let id = fee_id(params)?;
    state.with_service(|svc| svc.delete(&id, school))?;
    Ok(json!({ "deleted": true, "feeId": id }))
}

fn handle_pay_installment(state: &AppState, params: &Value) -> Result<Value> {
    let req: PayRequest = parse(params)?;
    let school = require_school_id(req.school_id.as_deref())?;
    let id = fee_id(params)?;
    let selector = installment(params)?;
    let ledger = state.with_service(|svc| {
        svc.pay_installment(&id, school, &selector, req.payment_method.as_deref())
    })?;
    to_json(&ledger)
}

fn handle_pay_multiple(state: &AppState, params: &Value) -> Result<Value> {
    let req: PayMultipleRequest = parse(params)?;
    let school = require_school_id(req.school_id.as_deref())?;
    let id = fee_id(params)?;
    let (ledger, outcome) = state.with_service(|svc| {
        svc.pay_multiple(&id, school, &req.selectors(), req.payment_method.as_deref())
    })?;
    Ok(json!({ "fee": to_json(&ledger)?, "outcome": to_json(&outcome)? }))
}

fn handle_receipt(state: &AppState, params: &Value) -> Result<Value> {
    let scope: SchoolScope = parse(params)?;
    let school = require_school_id(scope.school_id.as_deref())?;
    let id = fee_id(params)?;
    let selector = installment(params)?;
    let receipt = state.with_service(|svc| svc.receipt(&id, school, &selector))?;
    to_json(&receipt)
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "fees.create" => handle_create(state, &req.params),
        "fees.get" => handle_get(state, &req.params),
        "fees.update" => handle_update(state, &req.params),
        "fees.delete" => handle_delete(state, &req.params),
        "fees.payInstallment" => handle_pay_installment(state, &req.params),
        "fees.payMultiple" => handle_pay_multiple(state, &req.params),
        "fees.receipt" => handle_receipt(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
