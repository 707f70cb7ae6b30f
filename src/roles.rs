/// The three account kinds the system knows about. Closed set: handlers
/// dispatch on this enum and table names come from `table()`, never from
/// caller-supplied strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn table(self) -> &'static str {
        match self {
            Role::Admin => "admins",
            Role::Teacher => "teachers",
            Role::Student => "students",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Teacher => "Teacher",
            Role::Student => "Student",
        }
    }

    /// JSON value used in responses ("admin" / "teacher" / "student").
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    /// Column holding the human-facing code for this role, if any.
    /// Admins have no code; they are looked up by email only.
    pub fn code_column(self) -> Option<&'static str> {
        match self {
            Role::Admin => None,
            Role::Teacher => Some("teacher_code"),
            Role::Student => Some("student_code"),
        }
    }

    /// Fields a CSV row must carry for this role. Student rows do not need
    /// a code; the import derives one.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Role::Admin => &[],
            Role::Teacher => &["teacher_code", "name", "email"],
            Role::Student => &["roll_no", "name", "email"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_has_no_code_column() {
        assert_eq!(Role::Admin.code_column(), None);
        assert_eq!(Role::Student.code_column(), Some("student_code"));
    }

    #[test]
    fn tables_cover_the_closed_role_set() {
        assert_eq!(Role::Admin.table(), "admins");
        assert_eq!(Role::Teacher.table(), "teachers");
        assert_eq!(Role::Student.table(), "students");
    }
}
