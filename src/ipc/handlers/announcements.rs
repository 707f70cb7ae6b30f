use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::{db_err, err, not_found, ok};
use crate::ipc::helpers::{opt_str, require_db, require_str};
use crate::ipc::types::{AppState, Request};

fn teacher_id_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT id FROM teachers WHERE email = ?1", [email], |r| {
        r.get(0)
    })
    .optional()
}

fn student_id_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT id FROM students WHERE email = ?1", [email], |r| {
        r.get(0)
    })
    .optional()
}

/// Callers arrive pre-authenticated; `callerEmail` names the teacher the
/// middleware vouched for.
fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match require_str(&req.id, &req.params, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let caller_email = match require_str(&req.id, &req.params, "callerEmail") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let title = match require_str(&req.id, &req.params, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let content = opt_str(&req.params, "content");
    let announcement_type =
        opt_str(&req.params, "announcementType").unwrap_or_else(|| "general".to_string());

    let teacher_id = match teacher_id_by_email(conn, &caller_email) {
        Ok(Some(id)) => id,
        Ok(None) => {
            return err(
                &req.id,
                "forbidden",
                "only teachers can create announcements",
                None,
            )
        }
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?1", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };
    if class_exists.is_none() {
        return not_found(&req.id, "class");
    }

    let announcement_id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO announcements(
            id, class_id, teacher_id, title, content, announcement_type, created_at, updated_at
         ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        (
            &announcement_id,
            &class_id,
            &teacher_id,
            &title,
            &content,
            &announcement_type,
            &now,
        ),
    ) {
        return db_err(&req.id, "db_insert_failed", e);
    }

    ok(&req.id, json!({ "announcementId": announcement_id }))
}

fn handle_list_for_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match require_str(&req.id, &req.params, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT a.id, a.title, a.content, a.announcement_type, a.created_at,
                t.name, t.teacher_code
         FROM announcements a
         JOIN teachers t ON a.teacher_id = t.id
         WHERE a.class_id = ?1
         ORDER BY a.created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let rows = stmt
        .query_map([&class_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "title": row.get::<_, String>(1)?,
                "content": row.get::<_, Option<String>>(2)?,
                "announcementType": row.get::<_, String>(3)?,
                "createdAt": row.get::<_, Option<String>>(4)?,
                "teacherName": row.get::<_, String>(5)?,
                "teacherCode": row.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(announcements) => ok(&req.id, json!({ "announcements": announcements })),
        Err(e) => db_err(&req.id, "db_query_failed", e),
    }
}

/// Everything announced in any class the student belongs to, most recent
/// first, capped at 50.
fn handle_list_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let caller_email = match require_str(&req.id, &req.params, "callerEmail") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student_id = match student_id_by_email(conn, &caller_email) {
        Ok(Some(id)) => id,
        Ok(None) => return not_found(&req.id, "student"),
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let mut stmt = match conn.prepare(
        "SELECT DISTINCT a.id, a.title, a.content, a.announcement_type, a.created_at,
                c.class_name, t.name, t.teacher_code, cs.enrolled_subjects
         FROM announcements a
         JOIN classes c ON a.class_id = c.id
         JOIN teachers t ON a.teacher_id = t.id
         JOIN class_students cs ON c.id = cs.class_id
         WHERE cs.student_id = ?1
         ORDER BY a.created_at DESC
         LIMIT 50",
    ) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let rows = stmt
        .query_map([&student_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "title": row.get::<_, String>(1)?,
                "content": row.get::<_, Option<String>>(2)?,
                "announcementType": row.get::<_, String>(3)?,
                "createdAt": row.get::<_, Option<String>>(4)?,
                "className": row.get::<_, String>(5)?,
                "teacherName": row.get::<_, String>(6)?,
                "teacherCode": row.get::<_, String>(7)?,
                "enrolledSubjects": row.get::<_, Option<String>>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(announcements) => ok(&req.id, json!({ "announcements": announcements })),
        Err(e) => db_err(&req.id, "db_query_failed", e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "announcements.create" => Some(handle_create(state, req)),
        "announcements.listForClass" => Some(handle_list_for_class(state, req)),
        "announcements.listForStudent" => Some(handle_list_for_student(state, req)),
        _ => None,
    }
}
