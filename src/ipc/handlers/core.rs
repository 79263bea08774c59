use crate::ipc::error::ok;
use crate::ipc::types::Request;
use crate::state::AppState;
use serde_json::json;

fn handle_health(state: &AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "rescalePolicy": state.config().rescale_policy.to_string(),
            "moneyScale": state.config().money_scale,
        }),
    )
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        _ => None,
    }
}
