//! Identity-code derivation for students and classes.
//!
//! Both codes are built from the same academic attributes but with
//! different omission rules: the student code drops segments that carry no
//! information (stream equal to department, semester 0, unknown year),
//! while the class code always emits every field. The two functions are
//! kept separate on purpose; do not unify them.

/// Academic attributes a code is derived from. All fields optional; the
/// derivations are total and fall back to sentinel segments.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodeAttrs<'a> {
    pub department: Option<&'a str>,
    pub stream: Option<&'a str>,
    pub division: Option<&'a str>,
    pub semester: Option<&'a str>,
    pub academic_year: Option<&'a str>,
}

/// Student code: `DEPT[-STREAM]-DIV[-SEM][-YY]-ROLL`.
///
/// The stream segment is dropped when it normalizes to the same token as
/// the department; semester is dropped when absent or "0"; the 2-digit
/// year is dropped when it cannot be determined. The roll segment is
/// always present, left-padded to 3 digits.
pub fn derive_student_code(attrs: &CodeAttrs, roll_no: &str) -> String {
    let dept = token3(attrs.department).unwrap_or_else(|| "GEN".to_string());
    let stream = token3(attrs.stream).unwrap_or_else(|| "GEN".to_string());
    let division = upper_or(attrs.division, "X");
    let semester = attrs.semester.map(str::trim).unwrap_or("").to_string();
    let year = short_year(attrs.academic_year);

    let roll = {
        let t = roll_no.trim();
        let t = if t.is_empty() { "000" } else { t };
        format!("{:0>3}", t)
    };

    let mut parts: Vec<String> = Vec::new();
    parts.push(dept.clone());
    if stream != dept {
        parts.push(stream);
    }
    parts.push(division);
    if !semester.is_empty() && semester != "0" {
        parts.push(semester);
    }
    if year != "00" {
        parts.push(year);
    }
    parts.push(roll);

    parts.join("-")
}

/// Class code: `DEPT-STREAM-DIV-SEMnn-YYYY`. No field is ever omitted.
///
/// The 4-digit year pair comes from the academic-year string: two year
/// tokens ("2025-26") give last-two-digits of each; a single token gives
/// its last two digits followed by the next year's ("2025" -> "2526").
pub fn derive_class_code(attrs: &CodeAttrs) -> String {
    let dept = token3(attrs.department).unwrap_or_else(|| "GEN".to_string());
    let stream = token3(attrs.stream).unwrap_or_else(|| "GEN".to_string());
    let division = upper_or(attrs.division, "X");
    let semester = attrs.semester.map(str::trim).unwrap_or("");
    let semester = if semester.is_empty() {
        "00".to_string()
    } else {
        format!("{:0>2}", semester)
    };
    let year = year_pair(attrs.academic_year);

    format!("{}-{}-{}-SEM{}-{}", dept, stream, division, semester, year)
}

/// First three characters, uppercased, with inner whitespace removed.
/// None for blank input.
fn token3(s: Option<&str>) -> Option<String> {
    let t = s.map(str::trim).unwrap_or("");
    if t.is_empty() {
        return None;
    }
    let out: String = t
        .chars()
        .take(3)
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn upper_or(s: Option<&str>, default: &str) -> String {
    let t = s.map(str::trim).unwrap_or("");
    if t.is_empty() {
        default.to_string()
    } else {
        t.to_uppercase()
    }
}

/// Consecutive digit runs in the string, in order.
fn digit_runs(s: &str) -> Vec<String> {
    let mut runs: Vec<String> = Vec::new();
    let mut cur = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            cur.push(c);
        } else if !cur.is_empty() {
            runs.push(std::mem::take(&mut cur));
        }
    }
    if !cur.is_empty() {
        runs.push(cur);
    }
    runs
}

/// Two-digit year fragment for the student code. "2025-26", "2025" and
/// "25-26" all yield "25"; unparseable input yields "00".
fn short_year(s: Option<&str>) -> String {
    let Some(s) = s else {
        return "00".to_string();
    };
    let runs = digit_runs(s);
    for r in &runs {
        if r.len() >= 4 {
            return r[2..4].to_string();
        }
    }
    for r in &runs {
        if r.len() >= 2 {
            return r[..2].to_string();
        }
    }
    "00".to_string()
}

/// Year tokens as the class code understands them: a 4-digit year, or a
/// bare 2-digit year. Longer runs contribute their leading 4 digits.
fn year_tokens(s: &str) -> Vec<String> {
    digit_runs(s)
        .into_iter()
        .filter_map(|r| {
            if r.len() >= 4 {
                Some(r[..4].to_string())
            } else if r.len() >= 2 {
                Some(r[..2].to_string())
            } else {
                None
            }
        })
        .collect()
}

/// Four-digit year pair for the class code, default "2526".
fn year_pair(s: Option<&str>) -> String {
    let Some(s) = s else {
        return "2526".to_string();
    };
    let tokens = year_tokens(s);
    let last2 = |t: &str| t[t.len() - 2..].to_string();
    match tokens.len() {
        0 => "2526".to_string(),
        1 => {
            let a = last2(&tokens[0]);
            let next = (a.parse::<u32>().unwrap_or(25) + 1) % 100;
            format!("{}{:02}", a, next)
        }
        _ => format!("{}{}", last2(&tokens[0]), last2(&tokens[1])),
    }
}
