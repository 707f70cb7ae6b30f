mod test_support;

use serde_json::json;
use test_support::{error_code, request_err, request_ok, spawn_sidecar, student_row, temp_dir};

#[test]
fn one_bad_row_does_not_sink_the_batch() {
    let workspace = temp_dir("lmsd-partial");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.import",
        json!({ "rows": [
            student_row("1", "A", "a@x.edu", "Maths"),
            student_row("2", "B", "b@x.edu", "Maths"),
            { "roll_no": "3", "name": "C" },
            student_row("4", "D", "d@x.edu", "Maths"),
            student_row("5", "E", "e@x.edu", "Maths"),
        ]}),
    );

    // The call as a whole still succeeds.
    assert_eq!(result.get("success").and_then(|v| v.as_bool()), Some(true));
    let stats = result.get("stats").unwrap();
    assert_eq!(stats.get("total").and_then(|v| v.as_i64()), Some(5));
    assert_eq!(stats.get("inserted").and_then(|v| v.as_i64()), Some(4));

    let errors = result.get("errors").and_then(|v| v.as_array()).unwrap();
    assert_eq!(errors.len(), 1);
    let msg = errors[0].as_str().unwrap();
    assert!(msg.starts_with("Row 3:"), "unexpected error: {}", msg);
    assert!(msg.contains("Missing email"));

    // Blank rows are skipped without becoming errors.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.import",
        json!({ "rows": [{}, null, student_row("6", "F", "f@x.edu", "Maths")] }),
    );
    let stats = result.get("stats").unwrap();
    assert_eq!(stats.get("inserted").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(stats.get("errors").and_then(|v| v.as_i64()), Some(0));

    // A body without a rows array is the one structural failure.
    let err = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "students.import",
        json!({ "rows": "not-an-array" }),
    );
    assert_eq!(error_code(&err), "bad_params");

    let _ = std::fs::remove_dir_all(&workspace);
}
