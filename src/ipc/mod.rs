//! Line-delimited JSON protocol over stdin/stdout: one `{id, method, params}`
//! request per line, one `{id, ok, result | error}` response per line.

mod error;
mod handlers;
mod router;
mod types;

use std::io::{BufRead, Write};

pub use router::handle_request;
pub use types::Request;

use crate::state::AppState;

/// Serves requests until `input` reaches end of file.
pub fn serve_stdio<R: BufRead, W: Write>(
    state: &AppState,
    input: R,
    mut output: W,
) -> anyhow::Result<()> {
    for line in input.lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<Request>(&line) {
            Ok(req) => handle_request(state, req),
            // No id to echo back.
            Err(e) => serde_json::json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() }
            }),
        };
        writeln!(output, "{}", serde_json::to_string(&resp)?)?;
        output.flush()?;
    }
    Ok(())
}
