use serde_json::json;

use crate::import;
use crate::ipc::error::{bad_params, err, ok};
use crate::ipc::helpers::require_db;
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;

/// `teachers.import` / `students.import`: run one CSV batch through the
/// pipeline. The call succeeds whenever the batch itself ran; per-row
/// problems come back in `result.errors` for the admin UI to surface.
fn handle_import(state: &mut AppState, req: &Request, role: Role) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let Some(rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return bad_params(
            &req.id,
            format!(
                "invalid request format: expected rows to be an array of {} records",
                role.as_str()
            ),
        );
    };

    match import::import_batch(conn, state.mailer.as_ref(), &state.config, rows, role) {
        Ok(report) => ok(
            &req.id,
            json!({
                "success": true,
                "message": report.message(role),
                "stats": report.stats_json(role),
                "errors": report.errors,
            }),
        ),
        Err(e) => err(&req.id, "import_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.import" => Some(handle_import(state, req, Role::Teacher)),
        "students.import" => Some(handle_import(state, req, Role::Student)),
        _ => None,
    }
}
