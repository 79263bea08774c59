use serde_json::{json, Value};
use tracing::error;

use crate::ledger::LedgerError;

pub fn ok(id: &str, result: Value) -> Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Failure response whose code is the ledger error kind.
pub fn ledger_err(id: &str, e: &LedgerError) -> Value {
    match e {
        LedgerError::Internal(inner) => {
            error!(request_id = id, "request failed: {inner:#}");
            err(id, e.kind(), "Internal server error", None)
        }
        other => err(id, other.kind(), other.to_string(), None),
    }
}

pub fn respond(id: &str, result: Result<Value, LedgerError>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => ledger_err(id, &e),
    }
}
