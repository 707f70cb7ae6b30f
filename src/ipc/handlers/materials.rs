use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::{db_err, err, not_found, ok};
use crate::ipc::helpers::{opt_i64, opt_str, require_db, require_str};
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

    let teacher_id = match teacher_id_by_email(conn, &caller_email) {
        Ok(Some(id)) => id,
        Ok(None) => {
            return err(
                &req.id,
                "forbidden",
                "only teachers can upload study materials",
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

    let material_id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO study_materials(
            id, class_id, teacher_id, subject, title, description, material_type,
            file_url, file_name, file_size, youtube_link, upload_date, updated_at
         ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        (
            &material_id,
            &class_id,
            &teacher_id,
            &opt_str(&req.params, "subject"),
            &title,
            &opt_str(&req.params, "description"),
            &opt_str(&req.params, "materialType"),
            &opt_str(&req.params, "fileUrl"),
            &opt_str(&req.params, "fileName"),
            &opt_i64(&req.params, "fileSize"),
            &opt_str(&req.params, "youtubeLink"),
            &now,
        ),
    ) {
        return db_err(&req.id, "db_insert_failed", e);
    }

    ok(&req.id, json!({ "materialId": material_id }))
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
        "SELECT m.id, m.subject, m.title, m.description, m.material_type,
                m.file_url, m.file_name, m.file_size, m.youtube_link, m.upload_date,
                t.name
         FROM study_materials m
         LEFT JOIN teachers t ON m.teacher_id = t.id
         WHERE m.class_id = ?1 AND m.is_active = 1
         ORDER BY m.upload_date DESC",
    ) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let rows = stmt
        .query_map([&class_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "subject": row.get::<_, Option<String>>(1)?,
                "title": row.get::<_, String>(2)?,
                "description": row.get::<_, Option<String>>(3)?,
                "materialType": row.get::<_, Option<String>>(4)?,
                "fileUrl": row.get::<_, Option<String>>(5)?,
                "fileName": row.get::<_, Option<String>>(6)?,
                "fileSize": row.get::<_, Option<i64>>(7)?,
                "youtubeLink": row.get::<_, Option<String>>(8)?,
                "uploadDate": row.get::<_, Option<String>>(9)?,
                "teacherName": row.get::<_, Option<String>>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(materials) => ok(&req.id, json!({ "materials": materials })),
        Err(e) => db_err(&req.id, "db_query_failed", e),
    }
}

/// Materials visible to a student: scoped by their subject enrollments,
/// not just class membership, so electives they don't take stay hidden.
fn handle_list_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let caller_email = match require_str(&req.id, &req.params, "callerEmail") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_filter = opt_str(&req.params, "subject");

    let student_id = match student_id_by_email(conn, &caller_email) {
        Ok(Some(id)) => id,
        Ok(None) => return not_found(&req.id, "student"),
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let mut stmt = match conn.prepare(
        "SELECT DISTINCT m.id, m.subject, m.title, m.description, m.material_type,
                m.file_url, m.file_name, m.file_size, m.youtube_link, m.upload_date,
                c.class_name, t.name
         FROM study_materials m
         JOIN classes c ON c.id = m.class_id
         LEFT JOIN teachers t ON t.id = m.teacher_id
         JOIN subject_enrollments se
           ON se.class_id = m.class_id AND se.subject = m.subject AND se.student_id = ?1
         WHERE m.is_active = 1
         ORDER BY m.upload_date DESC",
    ) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let rows = stmt
        .query_map([&student_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "subject": row.get::<_, Option<String>>(1)?,
                "title": row.get::<_, String>(2)?,
                "description": row.get::<_, Option<String>>(3)?,
                "materialType": row.get::<_, Option<String>>(4)?,
                "fileUrl": row.get::<_, Option<String>>(5)?,
                "fileName": row.get::<_, Option<String>>(6)?,
                "fileSize": row.get::<_, Option<i64>>(7)?,
                "youtubeLink": row.get::<_, Option<String>>(8)?,
                "uploadDate": row.get::<_, Option<String>>(9)?,
                "className": row.get::<_, String>(10)?,
                "teacherName": row.get::<_, Option<String>>(11)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let materials = match rows {
        Ok(v) => v,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let materials: Vec<_> = match subject_filter {
        Some(subject) => materials
            .into_iter()
            .filter(|m| m.get("subject").and_then(|v| v.as_str()) == Some(subject.as_str()))
            .collect(),
        None => materials,
    };

    ok(&req.id, json!({ "materials": materials }))
}

/// Soft delete, and only by the teacher who uploaded the material.
fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let material_id = match require_str(&req.id, &req.params, "materialId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let caller_email = match require_str(&req.id, &req.params, "callerEmail") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let teacher_id = match teacher_id_by_email(conn, &caller_email) {
        Ok(Some(id)) => id,
        Ok(None) => {
            return err(
                &req.id,
                "forbidden",
                "only teachers can delete study materials",
                None,
            )
        }
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let owner: Option<Option<String>> = match conn
        .query_row(
            "SELECT teacher_id FROM study_materials WHERE id = ?1 AND is_active = 1",
            [&material_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };
    let Some(owner) = owner else {
        return not_found(&req.id, "material");
    };
    if owner.as_deref() != Some(teacher_id.as_str()) {
        return err(
            &req.id,
            "forbidden",
            "materials can only be deleted by their uploader",
            None,
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE study_materials SET is_active = 0, updated_at = ?1 WHERE id = ?2",
        (&db::now_ts(), &material_id),
    ) {
        return db_err(&req.id, "db_update_failed", e);
    }

    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "materials.create" => Some(handle_create(state, req)),
        "materials.listForClass" => Some(handle_list_for_class(state, req)),
        "materials.listForStudent" => Some(handle_list_for_student(state, req)),
        "materials.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
