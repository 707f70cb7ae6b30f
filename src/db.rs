use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "lms.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id TEXT PRIMARY KEY,
            name TEXT,
            email TEXT NOT NULL UNIQUE,
            password TEXT,
            reset_token TEXT,
            reset_token_expiry TEXT,
            last_reset_request TEXT,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            teacher_code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            mobile TEXT,
            faculty TEXT,
            department TEXT,
            subjects TEXT,
            password TEXT,
            reset_token TEXT,
            reset_token_expiry TEXT,
            last_reset_request TEXT,
            created_at TEXT
        )",
        [],
    )?;

    // No unique constraint on email or student_code: students are matched
    // by the class-scoped tuple, and one person may hold a record per
    // (roll_no, department, stream, division, semester, academic_year).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_code TEXT NOT NULL,
            roll_no TEXT,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            mobile TEXT,
            faculty TEXT,
            department TEXT,
            stream TEXT,
            division TEXT,
            semester TEXT,
            academic_year TEXT,
            subjects TEXT,
            password TEXT,
            reset_token TEXT,
            reset_token_expiry TEXT,
            last_reset_request TEXT,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_tuple
         ON students(roll_no, department, stream, division, semester, academic_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_email ON students(email)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            class_code TEXT NOT NULL UNIQUE,
            class_name TEXT NOT NULL,
            department TEXT,
            stream TEXT,
            division TEXT,
            semester TEXT,
            academic_year TEXT,
            faculty TEXT,
            subjects TEXT,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_tuple
         ON classes(department, stream, division, semester, academic_year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
            student_id TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
            student_code TEXT,
            enrolled_subjects TEXT,
            enrollment_date TEXT,
            UNIQUE(class_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_students_class ON class_students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_students_student ON class_students(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_teachers(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
            teacher_id TEXT NOT NULL REFERENCES teachers(id) ON DELETE CASCADE,
            subjects TEXT,
            assigned_date TEXT,
            is_primary INTEGER NOT NULL DEFAULT 0,
            UNIQUE(class_id, teacher_id, subjects)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_teachers_class ON class_teachers(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
            class_id TEXT NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
            subject TEXT NOT NULL,
            enrollment_date TEXT,
            UNIQUE(student_id, class_id, subject)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_enrollments_student
         ON subject_enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_enrollments_class
         ON subject_enrollments(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
            teacher_id TEXT REFERENCES teachers(id),
            title TEXT NOT NULL,
            content TEXT,
            announcement_type TEXT NOT NULL DEFAULT 'general',
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_announcements_class ON announcements(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS study_materials(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
            teacher_id TEXT REFERENCES teachers(id),
            subject TEXT,
            title TEXT NOT NULL,
            description TEXT,
            material_type TEXT,
            file_url TEXT,
            file_name TEXT,
            file_size INTEGER,
            youtube_link TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            upload_date TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_study_materials_class ON study_materials(class_id)",
        [],
    )?;

    // Databases created before the daily reset-rate-limit shipped lack the
    // attempt-counter columns. Add and default them.
    ensure_reset_rate_limit_columns(&conn)?;

    Ok(conn)
}

fn ensure_reset_rate_limit_columns(conn: &Connection) -> anyhow::Result<()> {
    for table in ["admins", "teachers", "students"] {
        if !table_has_column(conn, table, "reset_attempts")? {
            conn.execute(
                &format!(
                    "ALTER TABLE {} ADD COLUMN reset_attempts INTEGER NOT NULL DEFAULT 0",
                    table
                ),
                [],
            )?;
        }
        if !table_has_column(conn, table, "reset_attempt_date")? {
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN reset_attempt_date TEXT", table),
                [],
            )?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Current wall-clock time in the storage format used across the schema.
pub fn now_ts() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
