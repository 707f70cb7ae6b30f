mod test_support;

use serde_json::json;
use test_support::{
    error_code, outbox_count, request_err, request_ok, spawn_sidecar, teacher_row, temp_dir,
};

#[test]
fn forgot_password_enforces_gap_and_accepts_code_identifiers() {
    let workspace = temp_dir("lmsd-forgot");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.import",
        json!({ "rows": [teacher_row("T-101", "R. Kulkarni", "rk@college.edu", "Algebra")] }),
    );
    let welcome_mails = outbox_count(&workspace);

    // Import just stamped last_reset_request, so an immediate request
    // trips the 120-second gap.
    let err = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "auth.forgotPassword",
        json!({ "identifier": "rk@college.edu" }),
    );
    assert_eq!(error_code(&err), "rate_limited");

    // Backdate the last request; the daemon re-reads the row per call.
    let conn = rusqlite::Connection::open(workspace.join("lms.sqlite3")).expect("open db");
    conn.execute(
        "UPDATE teachers SET last_reset_request = '2025-01-01T00:00:00Z'",
        [],
    )
    .expect("backdate last request");

    // The teacher code works as an identifier, not just the email.
    let sent = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.forgotPassword",
        json!({ "identifier": "T-101" }),
    );
    assert_eq!(sent.get("success").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(outbox_count(&workspace), welcome_mails + 1);

    // The successful request re-stamps the gap.
    let err = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "auth.forgotPassword",
        json!({ "identifier": "T-101" }),
    );
    assert_eq!(error_code(&err), "rate_limited");

    // Three sends in a day exhaust the daily allowance regardless of gaps.
    conn.execute(
        "UPDATE teachers SET last_reset_request = '2025-01-01T00:00:00Z', reset_attempts = 3",
        [],
    )
    .expect("exhaust daily allowance");
    let err = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "auth.forgotPassword",
        json!({ "identifier": "rk@college.edu" }),
    );
    assert_eq!(error_code(&err), "rate_limited");

    let err = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "auth.forgotPassword",
        json!({ "identifier": "ghost@college.edu" }),
    );
    assert_eq!(error_code(&err), "not_found");

    let _ = std::fs::remove_dir_all(&workspace);
}
