use chrono::{NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

use crate::credentials;
use crate::db;
use crate::ipc::error::{db_err, err, ok};
use crate::ipc::helpers::{require_db, require_str};
use crate::ipc::types::{AppState, Request};
use crate::mailer;
use crate::roles::Role;

/// Lifetime of a forgot-password link.
const RESET_TOKEN_MINUTES: i64 = 2;
/// Minimum gap between two forgot-password requests.
const RESET_MIN_GAP_SECONDS: i64 = 120;
/// Requests allowed per account per day.
const RESET_DAILY_LIMIT: i64 = 3;

/// Login is unified across the three account tables; the first email hit
/// decides the role.
const LOGIN_ORDER: [Role; 3] = [Role::Admin, Role::Teacher, Role::Student];

struct Account {
    id: String,
    name: Option<String>,
    email: String,
    password: Option<String>,
    code: Option<String>,
    department: Option<String>,
    faculty: Option<String>,
    stream: Option<String>,
    roll_no: Option<String>,
}

impl Account {
    fn profile(&self, role: Role) -> Value {
        let mut user = json!({
            "id": self.id,
            "email": self.email,
            "name": self.name.clone().unwrap_or_else(|| role.label().to_string()),
            "userType": role.as_str(),
        });
        match role {
            Role::Teacher => {
                user["teacherCode"] = self.code.clone().into();
                user["department"] = self.department.clone().into();
            }
            Role::Student => {
                user["studentCode"] = self.code.clone().into();
                user["rollNo"] = self.roll_no.clone().into();
                user["department"] = self.department.clone().into();
                user["faculty"] = self.faculty.clone().into();
                user["stream"] = self.stream.clone().into();
            }
            Role::Admin => {}
        }
        user
    }
}

fn account_row(r: &rusqlite::Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: r.get(0)?,
        name: r.get(1)?,
        email: r.get(2)?,
        password: r.get(3)?,
        code: r.get(4)?,
        department: r.get(5)?,
        faculty: r.get(6)?,
        stream: r.get(7)?,
        roll_no: r.get(8)?,
    })
}

/// Per-role SELECT with a uniform column list; roles without a column
/// contribute NULL. The table and column names come from the closed Role
/// set, never from caller input.
fn account_select(role: Role, where_column: &str) -> String {
    let (table, code, faculty, stream, roll_no) = match role {
        Role::Admin => ("admins", "NULL", "NULL", "NULL", "NULL"),
        Role::Teacher => ("teachers", "teacher_code", "faculty", "NULL", "NULL"),
        Role::Student => ("students", "student_code", "faculty", "stream", "roll_no"),
    };
    let department = if role == Role::Admin { "NULL" } else { "department" };
    format!(
        "SELECT id, name, email, password, {code}, {department}, {faculty}, {stream}, {roll_no}
         FROM {table} WHERE {where_column} = ?1",
    )
}

fn find_account(
    conn: &Connection,
    role: Role,
    where_column: &str,
    value: &str,
) -> rusqlite::Result<Option<Account>> {
    conn.query_row(&account_select(role, where_column), [value], |r| {
        account_row(r)
    })
    .optional()
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let email = match require_str(&req.id, &req.params, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let password = match require_str(&req.id, &req.params, "password") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    for role in LOGIN_ORDER {
        let acct = match find_account(conn, role, "email", &email) {
            Ok(v) => v,
            Err(e) => return db_err(&req.id, "db_query_failed", e),
        };
        let Some(acct) = acct else {
            continue;
        };

        let Some(stored) = acct.password.as_deref().filter(|p| !p.trim().is_empty()) else {
            return err(
                &req.id,
                "no_password",
                "no password set; use forgot-password to set one first",
                None,
            );
        };
        if !credentials::verify_password(&password, stored) {
            return err(&req.id, "auth_failed", "invalid credentials", None);
        }
        return ok(
            &req.id,
            json!({
                "success": true,
                "message": "Login successful",
                "userType": role.as_str(),
                "user": acct.profile(role),
            }),
        );
    }

    err(&req.id, "auth_failed", "invalid credentials", None)
}

struct ResetState {
    id: String,
    name: Option<String>,
    email: String,
    reset_attempts: i64,
    reset_attempt_date: Option<String>,
    last_reset_request: Option<String>,
}

fn find_reset_state(
    conn: &Connection,
    role: Role,
    where_column: &str,
    value: &str,
) -> rusqlite::Result<Option<ResetState>> {
    let sql = format!(
        "SELECT id, name, email, reset_attempts, reset_attempt_date, last_reset_request
         FROM {} WHERE {} = ?1",
        role.table(),
        where_column
    );
    conn.query_row(&sql, [value], |r| {
        Ok(ResetState {
            id: r.get(0)?,
            name: r.get(1)?,
            email: r.get(2)?,
            reset_attempts: r.get(3)?,
            reset_attempt_date: r.get(4)?,
            last_reset_request: r.get(5)?,
        })
    })
    .optional()
}

fn handle_forgot_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let identifier = match require_str(&req.id, &req.params, "identifier") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let is_email = identifier.contains('@');

    // Admins are found by email only; teachers and students also by their
    // code when the identifier doesn't look like an email.
    let mut found: Option<(Role, ResetState)> = None;
    for role in LOGIN_ORDER {
        let column = if is_email {
            Some("email")
        } else {
            role.code_column()
        };
        let Some(column) = column else {
            continue;
        };
        match find_reset_state(conn, role, column, &identifier) {
            Ok(Some(st)) => {
                found = Some((role, st));
                break;
            }
            Ok(None) => {}
            Err(e) => return db_err(&req.id, "db_query_failed", e),
        }
    }
    let Some((role, st)) = found else {
        return err(
            &req.id,
            "not_found",
            "no account found with this email or ID",
            None,
        );
    };

    // Daily attempt counter rolls over at midnight UTC.
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let mut attempts = st.reset_attempts;
    if st.reset_attempt_date.as_deref() != Some(today.as_str()) {
        if let Err(e) = conn.execute(
            &format!(
                "UPDATE {} SET reset_attempts = 0, reset_attempt_date = ?1 WHERE id = ?2",
                role.table()
            ),
            (&today, &st.id),
        ) {
            return db_err(&req.id, "db_update_failed", e);
        }
        attempts = 0;
    }
    if attempts >= RESET_DAILY_LIMIT {
        return err(
            &req.id,
            "rate_limited",
            "daily reset limit reached; try again tomorrow",
            None,
        );
    }
    if let Some(last) = st.last_reset_request.as_deref().and_then(parse_ts) {
        let elapsed = (Utc::now().naive_utc() - last).num_seconds();
        if elapsed < RESET_MIN_GAP_SECONDS {
            return err(
                &req.id,
                "rate_limited",
                format!(
                    "please wait {} seconds before retrying",
                    RESET_MIN_GAP_SECONDS - elapsed
                ),
                None,
            );
        }
    }

    let token = credentials::new_reset_token();
    let expiry = (Utc::now() + chrono::Duration::minutes(RESET_TOKEN_MINUTES))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string();
    if let Err(e) = conn.execute(
        &format!(
            "UPDATE {} SET reset_token = ?1,
                           reset_token_expiry = ?2,
                           reset_attempts = reset_attempts + 1,
                           last_reset_request = ?3,
                           reset_attempt_date = ?4
             WHERE id = ?5",
            role.table()
        ),
        (&token, &expiry, &db::now_ts(), &today, &st.id),
    ) {
        return db_err(&req.id, "db_update_failed", e);
    }

    let name = st.name.clone().unwrap_or_else(|| role.label().to_string());
    let mail = mailer::reset_request_email(&state.config, role, &name, &st.email, &token);
    if let Err(e) = state.mailer.send(&mail) {
        // Without the link the caller cannot proceed, so a failed send
        // fails the request (unlike welcome mail during import).
        return err(&req.id, "mail_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "success": true, "message": "Reset link sent successfully" }),
    )
}

struct TokenHolder {
    id: String,
    name: Option<String>,
    email: String,
    expiry: Option<String>,
    code: Option<String>,
    department: Option<String>,
}

fn find_token_holder(
    conn: &Connection,
    role: Role,
    token: &str,
) -> rusqlite::Result<Option<TokenHolder>> {
    let (code, department) = match role {
        Role::Admin => ("NULL", "NULL"),
        Role::Teacher => ("teacher_code", "department"),
        Role::Student => ("student_code", "department"),
    };
    let sql = format!(
        "SELECT id, name, email, reset_token_expiry, {code}, {department}
         FROM {} WHERE reset_token = ?1",
        role.table()
    );
    conn.query_row(&sql, [token], |r| {
        Ok(TokenHolder {
            id: r.get(0)?,
            name: r.get(1)?,
            email: r.get(2)?,
            expiry: r.get(3)?,
            code: r.get(4)?,
            department: r.get(5)?,
        })
    })
    .optional()
}

fn clear_token(conn: &Connection, role: Role, id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "UPDATE {} SET reset_token = NULL, reset_token_expiry = NULL WHERE id = ?1",
            role.table()
        ),
        [id],
    )
}

/// Unparseable or missing expiries count as expired.
fn is_expired(expiry: Option<&str>) -> bool {
    match expiry.and_then(parse_ts) {
        Some(t) => Utc::now().naive_utc() > t,
        None => true,
    }
}

fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ").ok()
}

fn locate_token(
    conn: &Connection,
    token: &str,
) -> rusqlite::Result<Option<(Role, TokenHolder)>> {
    for role in LOGIN_ORDER {
        if let Some(holder) = find_token_holder(conn, role, token)? {
            return Ok(Some((role, holder)));
        }
    }
    Ok(None)
}

fn handle_verify_reset_token(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let token = match require_str(&req.id, &req.params, "token") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let holder = match locate_token(conn, &token) {
        Ok(v) => v,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };
    let Some((role, holder)) = holder else {
        return err(&req.id, "token_invalid", "invalid or expired token", None);
    };

    if is_expired(holder.expiry.as_deref()) {
        if let Err(e) = clear_token(conn, role, &holder.id) {
            return db_err(&req.id, "db_update_failed", e);
        }
        return err(&req.id, "token_expired", "reset link has expired", None);
    }

    let mut user = json!({
        "id": holder.id,
        "email": holder.email,
        "name": holder.name.clone().unwrap_or_else(|| role.label().to_string()),
        "userType": role.as_str(),
    });
    if role != Role::Admin {
        user["code"] = holder.code.clone().into();
        user["department"] = holder.department.clone().into();
    }

    ok(&req.id, json!({ "success": true, "user": user }))
}

fn handle_reset_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let token = match require_str(&req.id, &req.params, "token") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let password = match require_str(&req.id, &req.params, "password") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let holder = match locate_token(conn, &token) {
        Ok(v) => v,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };
    let Some((role, holder)) = holder else {
        return err(&req.id, "token_invalid", "invalid or expired link", None);
    };

    if is_expired(holder.expiry.as_deref()) {
        if let Err(e) = clear_token(conn, role, &holder.id) {
            return db_err(&req.id, "db_update_failed", e);
        }
        return err(&req.id, "token_expired", "reset link expired", None);
    }

    let hashed = credentials::hash_password(&password);
    if let Err(e) = conn.execute(
        &format!(
            "UPDATE {} SET password = ?1, reset_token = NULL, reset_token_expiry = NULL
             WHERE id = ?2",
            role.table()
        ),
        (&hashed, &holder.id),
    ) {
        return db_err(&req.id, "db_update_failed", e);
    }

    // The password is already set at this point; a failed confirmation
    // mail is reported, not treated as a failure.
    let name = holder
        .name
        .clone()
        .unwrap_or_else(|| role.label().to_string());
    let mail = mailer::reset_confirmation_email(&state.config, role, &name, &holder.email);
    let email_sent = state.mailer.send(&mail).is_ok();

    ok(
        &req.id,
        json!({
            "success": true,
            "message": "Password reset successful",
            "userType": role.as_str(),
            "emailSent": email_sent,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.forgotPassword" => Some(handle_forgot_password(state, req)),
        "auth.verifyResetToken" => Some(handle_verify_reset_token(state, req)),
        "auth.resetPassword" => Some(handle_reset_password(state, req)),
        _ => None,
    }
}
