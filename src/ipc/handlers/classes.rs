use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::codes::{self, CodeAttrs};
use crate::db;
use crate::ipc::error::{db_err, err, not_found, ok};
use crate::ipc::helpers::{opt_bool, opt_str, require_db, require_str};
use crate::ipc::types::{AppState, Request};

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Correlated subqueries keep the counts honest when a class has both
    // students and teachers attached.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id, c.class_code, c.class_name, c.department, c.stream, c.division,
           c.semester, c.academic_year, c.faculty, c.subjects,
           (SELECT COUNT(*) FROM class_students cs WHERE cs.class_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM class_teachers ct WHERE ct.class_id = c.id) AS teacher_count
         FROM classes c
         ORDER BY c.academic_year DESC, c.department, c.semester",
    ) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let class_code: String = row.get(1)?;
            let class_name: String = row.get(2)?;
            let department: Option<String> = row.get(3)?;
            let stream: Option<String> = row.get(4)?;
            let division: Option<String> = row.get(5)?;
            let semester: Option<String> = row.get(6)?;
            let academic_year: Option<String> = row.get(7)?;
            let faculty: Option<String> = row.get(8)?;
            let subjects: Option<String> = row.get(9)?;
            let student_count: i64 = row.get(10)?;
            let teacher_count: i64 = row.get(11)?;
            Ok(json!({
                "id": id,
                "classCode": class_code,
                "className": class_name,
                "department": department,
                "stream": stream,
                "division": division,
                "semester": semester,
                "academicYear": academic_year,
                "faculty": faculty,
                "subjects": subjects,
                "studentCount": student_count,
                "teacherCount": teacher_count,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => db_err(&req.id, "db_query_failed", e),
    }
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match require_str(&req.id, &req.params, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let class = match conn
        .query_row(
            "SELECT id, class_code, class_name, department, stream, division,
                    semester, academic_year, faculty, subjects
             FROM classes WHERE id = ?1",
            [&class_id],
            |row| {
                let subjects: Option<String> = row.get(9)?;
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "classCode": row.get::<_, String>(1)?,
                    "className": row.get::<_, String>(2)?,
                    "department": row.get::<_, Option<String>>(3)?,
                    "stream": row.get::<_, Option<String>>(4)?,
                    "division": row.get::<_, Option<String>>(5)?,
                    "semester": row.get::<_, Option<String>>(6)?,
                    "academicYear": row.get::<_, Option<String>>(7)?,
                    "faculty": row.get::<_, Option<String>>(8)?,
                    "subjects": subjects,
                }))
            },
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return not_found(&req.id, "class"),
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };

    let students = {
        let mut stmt = match conn.prepare(
            "SELECT s.id, s.student_code, s.roll_no, s.name, s.email,
                    cs.enrolled_subjects, cs.enrollment_date
             FROM students s
             JOIN class_students cs ON s.id = cs.student_id
             WHERE cs.class_id = ?1
             ORDER BY s.roll_no",
        ) {
            Ok(s) => s,
            Err(e) => return db_err(&req.id, "db_query_failed", e),
        };
        let rows = stmt
            .query_map([&class_id], |row| {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "studentCode": row.get::<_, String>(1)?,
                    "rollNo": row.get::<_, Option<String>>(2)?,
                    "name": row.get::<_, String>(3)?,
                    "email": row.get::<_, String>(4)?,
                    "enrolledSubjects": row.get::<_, Option<String>>(5)?,
                    "enrollmentDate": row.get::<_, Option<String>>(6)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return db_err(&req.id, "db_query_failed", e),
        }
    };

    let teachers = {
        let mut stmt = match conn.prepare(
            "SELECT t.id, t.teacher_code, t.name, t.email, t.department,
                    ct.id, ct.subjects, ct.assigned_date, ct.is_primary
             FROM teachers t
             JOIN class_teachers ct ON t.id = ct.teacher_id
             WHERE ct.class_id = ?1
             ORDER BY ct.is_primary DESC, t.name",
        ) {
            Ok(s) => s,
            Err(e) => return db_err(&req.id, "db_query_failed", e),
        };
        let rows = stmt
            .query_map([&class_id], |row| {
                let is_primary: i64 = row.get(8)?;
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "teacherCode": row.get::<_, String>(1)?,
                    "name": row.get::<_, String>(2)?,
                    "email": row.get::<_, String>(3)?,
                    "department": row.get::<_, Option<String>>(4)?,
                    "assignmentId": row.get::<_, String>(5)?,
                    "subjects": row.get::<_, Option<String>>(6)?,
                    "assignedDate": row.get::<_, Option<String>>(7)?,
                    "isPrimary": is_primary != 0,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return db_err(&req.id, "db_query_failed", e),
        }
    };

    let subjects: Vec<String> = class
        .get("subjects")
        .and_then(|v| v.as_str())
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    ok(
        &req.id,
        json!({
            "class": class,
            "students": students,
            "teachers": teachers,
            "subjects": subjects,
        }),
    )
}

/// Manual class creation outside any import. The class code is derived
/// from the same attributes the import uses, so a later CSV batch finds
/// this class instead of inventing a duplicate.
fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_name = match require_str(&req.id, &req.params, "className") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let department = match require_str(&req.id, &req.params, "department") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let stream = opt_str(&req.params, "stream");
    let division = opt_str(&req.params, "division");
    let semester = opt_str(&req.params, "semester");
    let academic_year = opt_str(&req.params, "academicYear")
        .unwrap_or_else(|| state.config.academic_year.clone());
    let faculty = opt_str(&req.params, "faculty");
    let subjects = opt_str(&req.params, "subjects");

    let class_code = codes::derive_class_code(&CodeAttrs {
        department: Some(&department),
        stream: stream.as_deref(),
        division: division.as_deref(),
        semester: semester.as_deref(),
        academic_year: Some(&academic_year),
    });

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM classes
             WHERE class_code = ?1
                OR (department IS ?2 AND stream IS ?3 AND division IS ?4
                    AND semester IS ?5 AND academic_year IS ?6)",
            (
                &class_code,
                &Some(department.clone()),
                &stream,
                &division,
                &semester,
                &Some(academic_year.clone()),
            ),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };
    if existing.is_some() {
        return err(
            &req.id,
            "conflict",
            "class already exists with these parameters",
            None,
        );
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(
            id, class_code, class_name, department, stream, division,
            semester, academic_year, faculty, subjects, created_at
         ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        (
            &class_id,
            &class_code,
            &class_name,
            &department,
            &stream,
            &division,
            &semester,
            &academic_year,
            &faculty,
            &subjects,
            &db::now_ts(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "classCode": class_code,
            "className": class_name,
        }),
    )
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match require_str(&req.id, &req.params, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let name: Option<String> = match conn
        .query_row(
            "SELECT class_name FROM classes WHERE id = ?1",
            [&class_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };
    let Some(name) = name else {
        return not_found(&req.id, "class");
    };

    // Memberships, enrollments, announcements and materials go with the
    // class via ON DELETE CASCADE.
    if let Err(e) = conn.execute("DELETE FROM classes WHERE id = ?1", [&class_id]) {
        return db_err(&req.id, "db_delete_failed", e);
    }

    ok(
        &req.id,
        json!({ "deleted": true, "className": name }),
    )
}

fn handle_assign_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match require_str(&req.id, &req.params, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let teacher_id = match require_str(&req.id, &req.params, "teacherId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subjects = match require_str(&req.id, &req.params, "subjects") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let is_primary = opt_bool(&req.params, "isPrimary").unwrap_or(false);

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
    let teacher_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?1", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_err(&req.id, "db_query_failed", e),
    };
    if teacher_exists.is_none() {
        return not_found(&req.id, "teacher");
    }

    // Re-assigning the same subjects just refreshes primacy and date.
    if let Err(e) = conn.execute(
        "INSERT INTO class_teachers(id, class_id, teacher_id, subjects, assigned_date, is_primary)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(class_id, teacher_id, subjects) DO UPDATE SET
           is_primary = excluded.is_primary,
           assigned_date = excluded.assigned_date",
        (
            &Uuid::new_v4().to_string(),
            &class_id,
            &teacher_id,
            &subjects,
            &db::now_ts(),
            if is_primary { 1 } else { 0 },
        ),
    ) {
        return db_err(&req.id, "db_insert_failed", e);
    }

    ok(&req.id, json!({ "assigned": true }))
}

fn handle_update_teacher_assignment(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let assignment_id = match require_str(&req.id, &req.params, "assignmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subjects = match require_str(&req.id, &req.params, "subjects") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let is_primary = opt_bool(&req.params, "isPrimary").unwrap_or(false);

    let n = match conn.execute(
        "UPDATE class_teachers SET subjects = ?1, is_primary = ?2, assigned_date = ?3
         WHERE id = ?4",
        (
            &subjects,
            if is_primary { 1 } else { 0 },
            &db::now_ts(),
            &assignment_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => return db_err(&req.id, "db_update_failed", e),
    };
    if n == 0 {
        return not_found(&req.id, "assignment");
    }

    ok(&req.id, json!({ "updated": true }))
}

fn handle_remove_teacher_assignment(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, &req.id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let assignment_id = match require_str(&req.id, &req.params, "assignmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let n = match conn.execute(
        "DELETE FROM class_teachers WHERE id = ?1",
        [&assignment_id],
    ) {
        Ok(n) => n,
        Err(e) => return db_err(&req.id, "db_delete_failed", e),
    };
    if n == 0 {
        return not_found(&req.id, "assignment");
    }

    ok(&req.id, json!({ "removed": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.get" => Some(handle_classes_get(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        "classes.assignTeacher" => Some(handle_assign_teacher(state, req)),
        "classes.updateTeacherAssignment" => Some(handle_update_teacher_assignment(state, req)),
        "classes.removeTeacherAssignment" => Some(handle_remove_teacher_assignment(state, req)),
        _ => None,
    }
}
