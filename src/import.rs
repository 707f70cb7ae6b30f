//! CSV bulk-import pipeline: row validation, person upsert, class
//! derivation and enrollment reconciliation.
//!
//! Rows are processed strictly in order. Student batches run in two
//! passes: pass one resolves every person and accumulates per-class-key
//! state, pass two writes classes and enrollments once the whole batch's
//! subject sets are known. A single row's failure never aborts the batch;
//! only a structurally bad request does.

use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::codes::{self, CodeAttrs};
use crate::config::Config;
use crate::credentials;
use crate::db;
use crate::mailer::{self, Mailer, WelcomeDetails};
use crate::roles::Role;

/// Minutes a freshly minted set-password link stays valid.
const WELCOME_TOKEN_MINUTES: i64 = 30;

#[derive(Debug, Default)]
pub struct BatchReport {
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub emails_sent: usize,
    pub classes_created: usize,
    pub classes_updated: usize,
    pub students_enrolled: usize,
    pub subject_facts_created: usize,
    pub errors: Vec<String>,
}

impl BatchReport {
    pub fn message(&self, role: Role) -> String {
        match role {
            Role::Student => format!(
                "CSV processed. {} new students added, {} existing updated, {} emails sent. \
                 Created {} new classes, updated {} classes, enrolled {} students.",
                self.inserted,
                self.updated,
                self.emails_sent,
                self.classes_created,
                self.classes_updated,
                self.students_enrolled
            ),
            _ => format!(
                "CSV processed successfully. {} inserted, {} updated, {} emails sent.",
                self.inserted, self.updated, self.emails_sent
            ),
        }
    }

    pub fn stats_json(&self, role: Role) -> Value {
        let mut stats = serde_json::json!({
            "total": self.total,
            "inserted": self.inserted,
            "updated": self.updated,
            "emailsSent": self.emails_sent,
            "errors": self.errors.len(),
        });
        if role == Role::Student {
            stats["classesCreated"] = self.classes_created.into();
            stats["classesUpdated"] = self.classes_updated.into();
            stats["studentsEnrolled"] = self.students_enrolled.into();
            stats["subjectFactsCreated"] = self.subject_facts_created.into();
        }
        stats
    }
}

/// A raw row after trimming and normalization. `code` is only set for
/// teacher rows; student codes are derived at insert time.
#[derive(Debug, Clone)]
pub struct ValidRow {
    pub code: Option<String>,
    pub roll_no: Option<String>,
    pub name: String,
    pub email: String,
    pub mobile: Option<String>,
    pub faculty: Option<String>,
    pub department: Option<String>,
    pub stream: Option<String>,
    pub division: Option<String>,
    pub semester: Option<String>,
    pub academic_year: Option<String>,
    pub subjects: Option<String>,
}

impl ValidRow {
    fn code_attrs(&self) -> CodeAttrs<'_> {
        CodeAttrs {
            department: self.department.as_deref(),
            stream: self.stream.as_deref(),
            division: self.division.as_deref(),
            semester: self.semester.as_deref(),
            academic_year: self.academic_year.as_deref(),
        }
    }
}

/// Trimmed string value of a row field. Numbers are accepted and
/// stringified (CSV parsers hand over roll numbers and semesters as
/// either). Blank values count as absent.
fn field(row: &Value, key: &str) -> Option<String> {
    let v = row.get(key)?;
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Empty object, null, or an object whose every value is blank.
fn row_is_blank(row: &Value) -> bool {
    match row {
        Value::Null => true,
        Value::Object(map) => {
            map.is_empty()
                || map.values().all(|v| match v {
                    Value::Null => true,
                    Value::String(s) => s.trim().is_empty(),
                    _ => false,
                })
        }
        _ => false,
    }
}

/// Comma-split, trim, drop empties, re-join. None when nothing survives.
fn normalize_subjects(raw: Option<String>) -> Option<String> {
    let raw = raw?;
    let parts: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

fn split_subjects(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Structural validation of one row. The error string is the row-level
/// reason ("Missing roll_no"), without the row-number prefix.
pub fn validate_row(row: &Value, role: Role, cfg: &Config) -> Result<ValidRow, String> {
    for required in role.required_fields() {
        if field(row, required).is_none() {
            return Err(format!("Missing {}", required));
        }
    }

    let academic_year = match role {
        Role::Student => {
            Some(field(row, "academic_year").unwrap_or_else(|| cfg.academic_year.clone()))
        }
        _ => field(row, "academic_year"),
    };

    Ok(ValidRow {
        code: field(row, "teacher_code"),
        roll_no: field(row, "roll_no"),
        name: field(row, "name").unwrap_or_default(),
        email: field(row, "email").unwrap_or_default(),
        mobile: field(row, "mobile"),
        faculty: field(row, "faculty"),
        department: field(row, "department"),
        stream: field(row, "stream"),
        division: field(row, "division"),
        semester: field(row, "semester"),
        academic_year,
        subjects: normalize_subjects(field(row, "subjects")),
    })
}

#[derive(Debug)]
struct UpsertOutcome {
    person_id: String,
    was_inserted: bool,
    /// Set-password token minted at insert; None on update.
    reset_token: Option<String>,
    /// Code the record carries (supplied for teachers, derived for students).
    code: String,
}

/// Teachers match on code OR email; either hit means update, not insert.
fn upsert_teacher(conn: &Connection, row: &ValidRow) -> anyhow::Result<UpsertOutcome> {
    let code = row.code.clone().unwrap_or_default();
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM teachers WHERE teacher_code = ?1 OR email = ?2",
            (&code, &row.email),
            |r| r.get(0),
        )
        .optional()?;

    if let Some(teacher_id) = existing {
        // COALESCE keeps stored values where the new row is silent.
        // Password and code are never touched on update.
        conn.execute(
            "UPDATE teachers SET
                name       = COALESCE(?1, name),
                mobile     = COALESCE(?2, mobile),
                faculty    = COALESCE(?3, faculty),
                department = COALESCE(?4, department),
                subjects   = COALESCE(?5, subjects)
             WHERE id = ?6",
            (
                &row.name,
                &row.mobile,
                &row.faculty,
                &row.department,
                &row.subjects,
                &teacher_id,
            ),
        )?;
        return Ok(UpsertOutcome {
            person_id: teacher_id,
            was_inserted: false,
            reset_token: None,
            code,
        });
    }

    let teacher_id = Uuid::new_v4().to_string();
    let token = credentials::new_reset_token();
    let expiry = token_expiry();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO teachers(
            id, teacher_code, name, email, mobile, faculty, department, subjects,
            reset_token, reset_token_expiry, last_reset_request, created_at
         ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        (
            &teacher_id,
            &code,
            &row.name,
            &row.email,
            &row.mobile,
            &row.faculty,
            &row.department,
            &row.subjects,
            &token,
            &expiry,
            &now,
        ),
    )?;
    Ok(UpsertOutcome {
        person_id: teacher_id,
        was_inserted: true,
        reset_token: Some(token),
        code,
    })
}

/// Students match on the class-scoped tuple, not on code or email: a
/// re-import of the same person in a different semester or class is a new
/// record by design.
fn upsert_student(conn: &Connection, row: &ValidRow) -> anyhow::Result<UpsertOutcome> {
    let roll_no = row.roll_no.clone().unwrap_or_default();
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT id, student_code FROM students
             WHERE roll_no = ?1
               AND department IS ?2
               AND stream IS ?3
               AND division IS ?4
               AND semester IS ?5
               AND academic_year IS ?6",
            (
                &roll_no,
                &row.department,
                &row.stream,
                &row.division,
                &row.semester,
                &row.academic_year,
            ),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    if let Some((student_id, existing_code)) = existing {
        conn.execute(
            "UPDATE students SET
                name    = COALESCE(?1, name),
                email   = COALESCE(?2, email),
                mobile  = COALESCE(?3, mobile),
                faculty = COALESCE(?4, faculty),
                subjects = COALESCE(?5, subjects)
             WHERE id = ?6",
            (
                &row.name,
                &row.email,
                &row.mobile,
                &row.faculty,
                &row.subjects,
                &student_id,
            ),
        )?;
        return Ok(UpsertOutcome {
            person_id: student_id,
            was_inserted: false,
            reset_token: None,
            code: existing_code,
        });
    }

    let code = codes::derive_student_code(&row.code_attrs(), &roll_no);
    let student_id = Uuid::new_v4().to_string();
    let token = credentials::new_reset_token();
    let expiry = token_expiry();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO students(
            id, student_code, roll_no, name, email, mobile, faculty, department,
            stream, division, semester, academic_year, subjects,
            reset_token, reset_token_expiry, last_reset_request, created_at
         ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)",
        (
            &student_id,
            &code,
            &roll_no,
            &row.name,
            &row.email,
            &row.mobile,
            &row.faculty,
            &row.department,
            &row.stream,
            &row.division,
            &row.semester,
            &row.academic_year,
            &row.subjects,
            &token,
            &expiry,
            &now,
        ),
    )?;
    Ok(UpsertOutcome {
        person_id: student_id,
        was_inserted: true,
        reset_token: Some(token),
        code,
    })
}

fn token_expiry() -> String {
    (chrono::Utc::now() + chrono::Duration::minutes(WELCOME_TOKEN_MINUTES))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Per-class-key state gathered in pass one of a student batch.
#[derive(Debug)]
struct ClassAccumulator {
    department: Option<String>,
    stream: Option<String>,
    division: Option<String>,
    semester: Option<String>,
    academic_year: Option<String>,
    faculty: Option<String>,
    /// Insertion-ordered, deduplicated.
    subjects: Vec<String>,
    student_ids: Vec<String>,
}

impl ClassAccumulator {
    fn from_row(row: &ValidRow) -> ClassAccumulator {
        ClassAccumulator {
            department: row.department.clone(),
            stream: row.stream.clone(),
            division: row.division.clone(),
            semester: row.semester.clone(),
            academic_year: row.academic_year.clone(),
            faculty: row.faculty.clone(),
            subjects: Vec::new(),
            student_ids: Vec::new(),
        }
    }

    fn add_subjects(&mut self, subjects: Option<&str>) {
        let Some(subjects) = subjects else {
            return;
        };
        for s in split_subjects(subjects) {
            if !self.subjects.contains(&s) {
                self.subjects.push(s);
            }
        }
    }

    fn code_attrs(&self) -> CodeAttrs<'_> {
        CodeAttrs {
            department: self.department.as_deref(),
            stream: self.stream.as_deref(),
            division: self.division.as_deref(),
            semester: self.semester.as_deref(),
            academic_year: self.academic_year.as_deref(),
        }
    }

    fn class_name(&self) -> String {
        format!(
            "{} - {} {} - Sem {} ({})",
            self.department.as_deref().unwrap_or("General"),
            self.stream.as_deref().unwrap_or(""),
            self.division.as_deref().unwrap_or(""),
            self.semester.as_deref().unwrap_or("N/A"),
            self.academic_year.as_deref().unwrap_or("2025-26"),
        )
    }
}

fn class_key(row: &ValidRow) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        row.department.as_deref().unwrap_or(""),
        row.stream.as_deref().unwrap_or(""),
        row.division.as_deref().unwrap_or(""),
        row.semester.as_deref().unwrap_or(""),
        row.academic_year.as_deref().unwrap_or(""),
    )
}

/// Union of the stored subject string and the newly discovered list,
/// stored order first, trimmed, deduplicated.
fn union_subjects(existing: Option<&str>, incoming: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(existing) = existing {
        for s in split_subjects(existing) {
            if !out.contains(&s) {
                out.push(s);
            }
        }
    }
    for s in incoming {
        if !out.contains(s) {
            out.push(s.clone());
        }
    }
    out
}

/// Find-or-create the class for one accumulator; merge subjects on a hit.
/// Returns (class_id, created, updated).
fn upsert_class(conn: &Connection, acc: &ClassAccumulator) -> anyhow::Result<(String, bool, bool)> {
    let class_code = codes::derive_class_code(&acc.code_attrs());

    let existing: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT id, subjects FROM classes
             WHERE class_code = ?1
                OR (department IS ?2 AND stream IS ?3 AND division IS ?4
                    AND semester IS ?5 AND academic_year IS ?6)",
            (
                &class_code,
                &acc.department,
                &acc.stream,
                &acc.division,
                &acc.semester,
                &acc.academic_year,
            ),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    if let Some((class_id, stored)) = existing {
        if acc.subjects.is_empty() {
            return Ok((class_id, false, false));
        }
        let merged = union_subjects(stored.as_deref(), &acc.subjects).join(",");
        if Some(merged.as_str()) != stored.as_deref() {
            conn.execute(
                "UPDATE classes SET subjects = ?1, updated_at = ?2 WHERE id = ?3",
                (&merged, &db::now_ts(), &class_id),
            )?;
            return Ok((class_id, false, true));
        }
        return Ok((class_id, false, false));
    }

    let class_id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO classes(
            id, class_code, class_name, department, stream, division,
            semester, academic_year, faculty, subjects, created_at
         ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        (
            &class_id,
            &class_code,
            &acc.class_name(),
            &acc.department,
            &acc.stream,
            &acc.division,
            &acc.semester,
            &acc.academic_year,
            &acc.faculty,
            &Some(acc.subjects.join(",")).filter(|s| !s.is_empty()),
            &now,
        ),
    )?;
    Ok((class_id, true, false))
}

/// Ensure the membership row and per-subject facts exist for one student.
/// Idempotent: an existing membership is left alone, and only missing
/// facts are inserted. Returns (newly_enrolled, facts_created).
fn reconcile_enrollment(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    class_subjects: &str,
) -> anyhow::Result<(bool, usize)> {
    let student_subjects: Option<String> = conn
        .query_row(
            "SELECT subjects FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?
        .flatten();

    // The student's own list wins; an empty list enrolls them in the
    // class's full subject set.
    let effective = match student_subjects.as_deref() {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => class_subjects.to_string(),
    };

    let membership: Option<String> = conn
        .query_row(
            "SELECT id FROM class_students WHERE class_id = ?1 AND student_id = ?2",
            (class_id, student_id),
            |r| r.get(0),
        )
        .optional()?;

    let newly_enrolled = membership.is_none();
    if newly_enrolled {
        conn.execute(
            "INSERT INTO class_students(
                id, class_id, student_id, student_code, enrolled_subjects, enrollment_date
             ) VALUES(?1, ?2, ?3,
                      (SELECT student_code FROM students WHERE id = ?3),
                      ?4, ?5)",
            (
                &Uuid::new_v4().to_string(),
                class_id,
                student_id,
                &effective,
                &db::now_ts(),
            ),
        )?;
    }

    let mut facts_created = 0usize;
    for subject in split_subjects(&effective) {
        let n = conn.execute(
            "INSERT OR IGNORE INTO subject_enrollments(
                id, student_id, class_id, subject, enrollment_date
             ) VALUES(?1, ?2, ?3, ?4, ?5)",
            (
                &Uuid::new_v4().to_string(),
                student_id,
                class_id,
                &subject,
                &db::now_ts(),
            ),
        )?;
        facts_created += n;
    }

    Ok((newly_enrolled, facts_created))
}

/// Pass two for one class key: class upsert, then enrollment for each
/// accumulated student. An error here abandons the rest of this class
/// key's work but not the other keys.
fn process_class_group(
    conn: &Connection,
    acc: &ClassAccumulator,
    report: &mut BatchReport,
) -> anyhow::Result<()> {
    let (class_id, created, updated) = upsert_class(conn, acc)?;
    if created {
        report.classes_created += 1;
    }
    if updated {
        report.classes_updated += 1;
    }

    let class_subjects = acc.subjects.join(",");
    for student_id in &acc.student_ids {
        let (newly_enrolled, facts) =
            reconcile_enrollment(conn, &class_id, student_id, &class_subjects)?;
        if newly_enrolled {
            report.students_enrolled += 1;
        }
        report.subject_facts_created += facts;
    }
    Ok(())
}

fn send_welcome(
    mailer: &dyn Mailer,
    cfg: &Config,
    role: Role,
    row: &ValidRow,
    outcome: &UpsertOutcome,
) -> anyhow::Result<()> {
    let details = WelcomeDetails {
        name: &row.name,
        email: &row.email,
        code: &outcome.code,
        roll_no: row.roll_no.as_deref(),
        mobile: row.mobile.as_deref(),
        faculty: row.faculty.as_deref(),
        department: row.department.as_deref(),
        stream: row.stream.as_deref(),
    };
    let token = outcome.reset_token.as_deref().unwrap_or_default();
    mailer.send(&mailer::welcome_email(cfg, role, &details, token))
}

/// Run one CSV batch for the given role. Returns Err only for structural
/// problems (a role that cannot be imported); per-row and per-class
/// failures land in the report's error list with processing continuing.
pub fn import_batch(
    conn: &Connection,
    mailer: &dyn Mailer,
    cfg: &Config,
    rows: &[Value],
    role: Role,
) -> anyhow::Result<BatchReport> {
    if role == Role::Admin {
        anyhow::bail!("admin accounts cannot be bulk-imported");
    }

    let mut report = BatchReport {
        total: rows.len(),
        ..BatchReport::default()
    };

    // Pass one: people. Student rows also accumulate per-class state so
    // that pass two sees the whole batch's subject union before writing.
    let mut class_map: HashMap<String, ClassAccumulator> = HashMap::new();
    let mut key_order: Vec<String> = Vec::new();

    for (i, raw) in rows.iter().enumerate() {
        let row_no = i + 1;
        if row_is_blank(raw) {
            continue;
        }

        let row = match validate_row(raw, role, cfg) {
            Ok(v) => v,
            Err(reason) => {
                report.errors.push(format!("Row {}: {}", row_no, reason));
                continue;
            }
        };

        let outcome = match role {
            Role::Teacher => upsert_teacher(conn, &row),
            Role::Student => upsert_student(conn, &row),
            Role::Admin => unreachable!(),
        };
        let outcome = match outcome {
            Ok(v) => v,
            Err(e) => {
                report.errors.push(format!("Row {}: {}", row_no, e));
                continue;
            }
        };

        if outcome.was_inserted {
            report.inserted += 1;
            match send_welcome(mailer, cfg, role, &row, &outcome) {
                Ok(()) => report.emails_sent += 1,
                Err(_) => report.errors.push(format!(
                    "Row {}: {} added but email failed to send",
                    row_no,
                    role.label()
                )),
            }
        } else {
            report.updated += 1;
        }

        if role == Role::Student {
            let key = class_key(&row);
            let acc = class_map.entry(key.clone()).or_insert_with(|| {
                key_order.push(key);
                ClassAccumulator::from_row(&row)
            });
            acc.student_ids.push(outcome.person_id);
            acc.add_subjects(row.subjects.as_deref());
        }
    }

    // Pass two: classes and enrollments, one class key at a time.
    for key in &key_order {
        let acc = &class_map[key];
        if let Err(e) = process_class_group(conn, acc, &mut report) {
            report
                .errors
                .push(format!("Class creation error for {}: {}", key, e));
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::OutboundEmail;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingMailer {
        sent: Mutex<Vec<OutboundEmail>>,
    }

    impl RecordingMailer {
        fn new() -> RecordingMailer {
            RecordingMailer {
                sent: Mutex::new(Vec::new()),
            }
        }
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl Mailer for RecordingMailer {
        fn send(&self, email: &OutboundEmail) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    struct FailingMailer;

    impl Mailer for FailingMailer {
        fn send(&self, _email: &OutboundEmail) -> anyhow::Result<()> {
            anyhow::bail!("smtp connection refused")
        }
    }

    fn temp_conn() -> (Connection, std::path::PathBuf) {
        let ws = std::env::temp_dir().join(format!("lmsd-import-{}", Uuid::new_v4()));
        let conn = crate::db::open_db(&ws).expect("open db");
        (conn, ws)
    }

    fn student_row(roll: &str, name: &str, email: &str, subjects: &str) -> Value {
        json!({
            "roll_no": roll,
            "name": name,
            "email": email,
            "department": "Computer Science",
            "stream": "Science",
            "division": "A",
            "semester": "3",
            "academic_year": "2025-26",
            "subjects": subjects,
        })
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn teacher_batch_inserts_then_updates_on_code_or_email() {
        let (conn, ws) = temp_conn();
        let m = RecordingMailer::new();
        let cfg = Config::default();

        let rows = vec![json!({
            "teacher_code": "T-101",
            "name": "R. Kulkarni",
            "email": "rk@college.edu",
            "mobile": "9998887776",
            "department": "Mathematics",
            "subjects": "Algebra, Calculus",
        })];
        let r1 = import_batch(&conn, &m, &cfg, &rows, Role::Teacher).unwrap();
        assert_eq!((r1.inserted, r1.updated), (1, 0));
        assert_eq!(r1.emails_sent, 1);

        // Same code, different email: still the same teacher.
        let rows2 = vec![json!({
            "teacher_code": "T-101",
            "name": "Rahul Kulkarni",
            "email": "rahul.k@college.edu",
            "subjects": "Algebra,Calculus,Statistics",
        })];
        let r2 = import_batch(&conn, &m, &cfg, &rows2, Role::Teacher).unwrap();
        assert_eq!((r2.inserted, r2.updated), (0, 1));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM teachers"), 1);

        // COALESCE: the second row had no mobile, so the stored one stays.
        let mobile: String = conn
            .query_row("SELECT mobile FROM teachers", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mobile, "9998887776");
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn student_batch_creates_class_and_enrollments() {
        let (conn, ws) = temp_conn();
        let m = RecordingMailer::new();
        let cfg = Config::default();

        let rows = vec![
            student_row("1", "Asha", "asha@x.edu", "Maths, Physics"),
            student_row("2", "Binod", "binod@x.edu", "Physics, Chemistry"),
        ];
        let r = import_batch(&conn, &m, &cfg, &rows, Role::Student).unwrap();
        assert_eq!((r.inserted, r.updated), (2, 0));
        assert_eq!(r.classes_created, 1);
        assert_eq!(r.students_enrolled, 2);
        assert_eq!(m.count(), 2);

        // Batch-wide union lands on the class before any enrollment row.
        let subjects: String = conn
            .query_row("SELECT subjects FROM classes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(subjects, "Maths,Physics,Chemistry");

        // Each student carries their own subject facts.
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM class_students"), 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM subject_enrollments"), 4);

        let code: String = conn
            .query_row(
                "SELECT student_code FROM students WHERE roll_no = '1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(code, "COM-SCI-A-3-25-001");
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn reimport_is_idempotent() {
        let (conn, ws) = temp_conn();
        let m = RecordingMailer::new();
        let cfg = Config::default();

        let rows = vec![
            student_row("1", "Asha", "asha@x.edu", "Maths"),
            student_row("2", "Binod", "binod@x.edu", "Physics"),
        ];
        let r1 = import_batch(&conn, &m, &cfg, &rows, Role::Student).unwrap();
        assert_eq!((r1.inserted, r1.updated), (2, 0));
        let subjects_before: String = conn
            .query_row("SELECT subjects FROM classes", [], |r| r.get(0))
            .unwrap();

        let r2 = import_batch(&conn, &m, &cfg, &rows, Role::Student).unwrap();
        assert_eq!((r2.inserted, r2.updated), (0, 2));
        assert_eq!(r2.classes_created, 0);
        assert_eq!(r2.classes_updated, 0);
        assert_eq!(r2.students_enrolled, 0);
        assert_eq!(r2.subject_facts_created, 0);

        let subjects_after: String = conn
            .query_row("SELECT subjects FROM classes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(subjects_before, subjects_after);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM students"), 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM class_students"), 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM subject_enrollments"), 2);
        // Welcome mail goes out on insert only.
        assert_eq!(m.count(), 2);
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn class_subject_set_grows_monotonically() {
        let (conn, ws) = temp_conn();
        let m = RecordingMailer::new();
        let cfg = Config::default();

        let r1 = import_batch(
            &conn,
            &m,
            &cfg,
            &[student_row("1", "Asha", "asha@x.edu", "Maths, Physics")],
            Role::Student,
        )
        .unwrap();
        assert_eq!(r1.classes_created, 1);

        // A later batch brings one overlapping and one new subject.
        let r2 = import_batch(
            &conn,
            &m,
            &cfg,
            &[student_row("3", "Chitra", "chitra@x.edu", "Physics, Biology")],
            Role::Student,
        )
        .unwrap();
        assert_eq!(r2.classes_created, 0);
        assert_eq!(r2.classes_updated, 1);

        let subjects: String = conn
            .query_row("SELECT subjects FROM classes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(subjects, "Maths,Physics,Biology");
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn row_failure_does_not_abort_batch() {
        let (conn, ws) = temp_conn();
        let m = RecordingMailer::new();
        let cfg = Config::default();

        let rows = vec![
            student_row("1", "A", "a@x.edu", "Maths"),
            student_row("2", "B", "b@x.edu", "Maths"),
            json!({ "roll_no": "3", "name": "C" }),
            student_row("4", "D", "d@x.edu", "Maths"),
            student_row("5", "E", "e@x.edu", "Maths"),
        ];
        let r = import_batch(&conn, &m, &cfg, &rows, Role::Student).unwrap();
        assert_eq!(r.total, 5);
        assert_eq!(r.inserted, 4);
        assert_eq!(r.errors.len(), 1);
        assert!(r.errors[0].starts_with("Row 3:"));
        assert!(r.errors[0].contains("Missing email"));
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn empty_rows_skip_without_counting_as_errors() {
        let (conn, ws) = temp_conn();
        let m = RecordingMailer::new();
        let cfg = Config::default();

        let rows = vec![
            json!({}),
            json!(null),
            json!({ "name": "  ", "email": "" }),
            student_row("1", "A", "a@x.edu", "Maths"),
        ];
        let r = import_batch(&conn, &m, &cfg, &rows, Role::Student).unwrap();
        assert_eq!(r.total, 4);
        assert_eq!(r.inserted, 1);
        assert!(r.errors.is_empty());
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn update_preserves_unspecified_fields_and_overwrites_given_ones() {
        let (conn, ws) = temp_conn();
        let m = RecordingMailer::new();
        let cfg = Config::default();

        let mut first = student_row("7", "Asha", "asha@x.edu", "Maths");
        first["mobile"] = json!("1112223334");
        import_batch(&conn, &m, &cfg, &[first], Role::Student).unwrap();

        // Omitting mobile keeps the stored value.
        let r = import_batch(
            &conn,
            &m,
            &cfg,
            &[student_row("7", "Asha R", "asha@x.edu", "Maths")],
            Role::Student,
        )
        .unwrap();
        assert_eq!(r.updated, 1);
        let (name, mobile): (String, String) = conn
            .query_row("SELECT name, mobile FROM students", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "Asha R");
        assert_eq!(mobile, "1112223334");

        // Supplying a new mobile overwrites it.
        let mut third = student_row("7", "Asha R", "asha@x.edu", "Maths");
        third["mobile"] = json!("9990001112");
        import_batch(&conn, &m, &cfg, &[third], Role::Student).unwrap();
        let mobile: String = conn
            .query_row("SELECT mobile FROM students", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mobile, "9990001112");
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn same_email_two_class_tuples_creates_two_students() {
        let (conn, ws) = temp_conn();
        let m = RecordingMailer::new();
        let cfg = Config::default();

        let mut sem4 = student_row("7", "Asha", "asha@x.edu", "Maths");
        sem4["semester"] = json!("4");
        let rows = vec![student_row("7", "Asha", "asha@x.edu", "Maths"), sem4];
        let r = import_batch(&conn, &m, &cfg, &rows, Role::Student).unwrap();

        // The match key is the class tuple, not the email.
        assert_eq!(r.inserted, 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM students"), 2);
        assert_eq!(r.classes_created, 2);
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn email_failure_is_a_warning_not_a_row_failure() {
        let (conn, ws) = temp_conn();
        let cfg = Config::default();

        let r = import_batch(
            &conn,
            &FailingMailer,
            &cfg,
            &[student_row("1", "Asha", "asha@x.edu", "Maths")],
            Role::Student,
        )
        .unwrap();
        assert_eq!(r.inserted, 1);
        assert_eq!(r.emails_sent, 0);
        assert_eq!(r.errors.len(), 1);
        assert!(r.errors[0].contains("added but email failed"));
        // The insert survived and the student still got enrolled.
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM class_students"), 1);
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn new_subject_on_existing_membership_adds_missing_fact_only() {
        let (conn, ws) = temp_conn();
        let m = RecordingMailer::new();
        let cfg = Config::default();

        import_batch(
            &conn,
            &m,
            &cfg,
            &[student_row("1", "Asha", "asha@x.edu", "Maths")],
            Role::Student,
        )
        .unwrap();

        // Re-import with an extended subject list: membership already
        // exists, but the new fact row must appear exactly once.
        let r = import_batch(
            &conn,
            &m,
            &cfg,
            &[student_row("1", "Asha", "asha@x.edu", "Maths, Statistics")],
            Role::Student,
        )
        .unwrap();
        assert_eq!(r.students_enrolled, 0);
        assert_eq!(r.subject_facts_created, 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM class_students"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM subject_enrollments"), 2);
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn enrollment_falls_back_to_class_subjects_when_student_has_none() {
        let (conn, ws) = temp_conn();
        let m = RecordingMailer::new();
        let cfg = Config::default();

        let rows = vec![
            student_row("1", "Asha", "asha@x.edu", "Maths, Physics"),
            student_row("2", "Binod", "binod@x.edu", ""),
        ];
        let r = import_batch(&conn, &m, &cfg, &rows, Role::Student).unwrap();
        assert_eq!(r.students_enrolled, 2);

        let enrolled: String = conn
            .query_row(
                "SELECT cs.enrolled_subjects
                 FROM class_students cs
                 JOIN students s ON s.id = cs.student_id
                 WHERE s.roll_no = '2'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(enrolled, "Maths,Physics");
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn subjects_are_normalized_during_validation() {
        let cfg = Config::default();
        let row = json!({
            "roll_no": 12,
            "name": " Asha ",
            "email": " asha@x.edu ",
            "subjects": " Maths ,  , Physics,",
        });
        let v = validate_row(&row, Role::Student, &cfg).unwrap();
        assert_eq!(v.roll_no.as_deref(), Some("12"));
        assert_eq!(v.name, "Asha");
        assert_eq!(v.email, "asha@x.edu");
        assert_eq!(v.subjects.as_deref(), Some("Maths,Physics"));
        // Absent academic year takes the configured default.
        assert_eq!(v.academic_year.as_deref(), Some("2025-26"));
    }

    #[test]
    fn teacher_rows_require_a_code_but_student_rows_do_not() {
        let cfg = Config::default();
        let row = json!({ "name": "X", "email": "x@x.edu" });
        let err = validate_row(&row, Role::Teacher, &cfg).unwrap_err();
        assert_eq!(err, "Missing teacher_code");

        let row = json!({ "roll_no": "9", "name": "X", "email": "x@x.edu" });
        assert!(validate_row(&row, Role::Student, &cfg).is_ok());
    }

    #[test]
    fn admin_batches_are_rejected_structurally() {
        let (conn, ws) = temp_conn();
        let m = RecordingMailer::new();
        let cfg = Config::default();
        assert!(import_batch(&conn, &m, &cfg, &[], Role::Admin).is_err());
        let _ = std::fs::remove_dir_all(&ws);
    }
}
