mod test_support;

use serde_json::json;
use test_support::{
    error_code, request_err, request_ok, spawn_sidecar, student_row, temp_dir,
};

#[test]
fn admin_seed_reset_and_login() {
    let workspace = temp_dir("lmsd-auth");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "admins.create",
        json!({ "name": "Root", "email": "root@college.edu" }),
    );
    assert!(created.get("adminId").and_then(|v| v.as_str()).is_some());
    assert_eq!(created.get("emailSent").and_then(|v| v.as_bool()), Some(true));

    // The daemon holds the workspace database; read the minted token out
    // of it the way an operator could.
    let conn = rusqlite::Connection::open(workspace.join("lms.sqlite3")).expect("open db");
    let token: String = conn
        .query_row(
            "SELECT reset_token FROM admins WHERE email = 'root@college.edu'",
            [],
            |r| r.get(0),
        )
        .expect("admin reset token");

    let verified = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "auth.verifyResetToken",
        json!({ "token": token }),
    );
    assert_eq!(
        verified["user"]["userType"].as_str(),
        Some("admin"),
        "token should resolve to the admin account"
    );

    let reset = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.resetPassword",
        json!({ "token": token, "password": "S3cure!pass" }),
    );
    assert_eq!(reset.get("success").and_then(|v| v.as_bool()), Some(true));

    // Token is single-use.
    let err = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "auth.verifyResetToken",
        json!({ "token": token }),
    );
    assert_eq!(error_code(&err), "token_invalid");

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "auth.login",
        json!({ "email": "root@college.edu", "password": "S3cure!pass" }),
    );
    assert_eq!(login["userType"].as_str(), Some("admin"));
    assert_eq!(login["user"]["name"].as_str(), Some("Root"));

    let err = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "auth.login",
        json!({ "email": "root@college.edu", "password": "wrong" }),
    );
    assert_eq!(error_code(&err), "auth_failed");

    // A freshly imported student has no password yet; login must say so
    // instead of reporting bad credentials.
    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.import",
        json!({ "rows": [student_row("1", "Asha", "asha@x.edu", "Maths")] }),
    );
    let err = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "auth.login",
        json!({ "email": "asha@x.edu", "password": "anything" }),
    );
    assert_eq!(error_code(&err), "no_password");

    let err = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "auth.login",
        json!({ "email": "nobody@college.edu", "password": "x" }),
    );
    assert_eq!(error_code(&err), "auth_failed");

    let _ = std::fs::remove_dir_all(&workspace);
}
