use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::credentials;
use crate::db;
use crate::ipc::error::{db_err, err, ok};
use crate::ipc::helpers::{opt_str, require_db, require_str};
use crate::ipc::types::{AppState, Request};
use crate::mailer;
use crate::roles::Role;

/// Admin accounts are seeded by an operator, not CSV-imported. The new
/// account has no password; the reset link in the email sets one.
fn handle_admins_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let email = match require_str(&req.id, &req.params, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = opt_str(&req.params, "name");

    let admin_id = Uuid::new_v4().to_string();
    let token = credentials::new_reset_token();
    let expiry = (Utc::now() + chrono::Duration::minutes(30))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO admins(
            id, name, email, reset_token, reset_token_expiry, last_reset_request, created_at
         ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        (&admin_id, &name, &email, &token, &expiry, &db::now_ts()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "admins" })),
        );
    }

    let display = name.unwrap_or_else(|| "Admin".to_string());
    let mail = mailer::reset_request_email(&state.config, Role::Admin, &display, &email, &token);
    let email_sent = state.mailer.send(&mail).is_ok();

    ok(
        &req.id,
        json!({ "adminId": admin_id, "emailSent": email_sent }),
    )
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT teacher_code, name, email, mobile, faculty, department, subjects
         FROM teachers
         ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let rows = stmt
        .query_map([], |row| {
            let teacher_code: String = row.get(0)?;
            let name: String = row.get(1)?;
            let email: String = row.get(2)?;
            let mobile: Option<String> = row.get(3)?;
            let faculty: Option<String> = row.get(4)?;
            let department: Option<String> = row.get(5)?;
            let subjects: Option<String> = row.get(6)?;
            Ok(json!({
                "teacherCode": teacher_code,
                "name": name,
                "email": email,
                "mobile": mobile,
                "faculty": faculty,
                "department": department,
                "subjects": subjects,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => db_err(&req.id, "db_query_failed", e),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT student_code, roll_no, name, email, mobile, faculty, department,
                stream, division, semester, academic_year, subjects
         FROM students
         ORDER BY roll_no",
    ) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let rows = stmt
        .query_map([], |row| {
            let student_code: String = row.get(0)?;
            let roll_no: Option<String> = row.get(1)?;
            let name: String = row.get(2)?;
            let email: String = row.get(3)?;
            let mobile: Option<String> = row.get(4)?;
            let faculty: Option<String> = row.get(5)?;
            let department: Option<String> = row.get(6)?;
            let stream: Option<String> = row.get(7)?;
            let division: Option<String> = row.get(8)?;
            let semester: Option<String> = row.get(9)?;
            let academic_year: Option<String> = row.get(10)?;
            let subjects: Option<String> = row.get(11)?;
            Ok(json!({
                "studentCode": student_code,
                "rollNo": roll_no,
                "name": name,
                "email": email,
                "mobile": mobile,
                "faculty": faculty,
                "department": department,
                "stream": stream,
                "division": division,
                "semester": semester,
                "academicYear": academic_year,
                "subjects": subjects,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => db_err(&req.id, "db_query_failed", e),
    }
}

/// Distinct non-blank values of one column, for UI filter dropdowns.
fn handle_distinct(
    state: &mut AppState,
    req: &Request,
    table: &str,
    column: &str,
    result_key: &str,
) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let sql = format!(
        "SELECT DISTINCT {column} FROM {table}
         WHERE {column} IS NOT NULL AND {column} != ''
         ORDER BY {column}",
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(values) => {
            let mut result = serde_json::Map::new();
            result.insert(result_key.to_string(), json!(values));
            ok(&req.id, serde_json::Value::Object(result))
        }
        Err(e) => db_err(&req.id, "db_query_failed", e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admins.create" => Some(handle_admins_create(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.departments" => Some(handle_distinct(
            state,
            req,
            "teachers",
            "department",
            "departments",
        )),
        "students.list" => Some(handle_students_list(state, req)),
        "students.departments" => Some(handle_distinct(
            state,
            req,
            "students",
            "department",
            "departments",
        )),
        "students.faculties" => Some(handle_distinct(
            state,
            req,
            "students",
            "faculty",
            "faculties",
        )),
        _ => None,
    }
}
