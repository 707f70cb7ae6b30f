mod test_support;

use serde_json::json;
use test_support::{request_ok, spawn_sidecar, student_row, temp_dir};

#[test]
fn export_import_moves_a_workspace() {
    let ws1 = temp_dir("lmsd-backup-a");
    let ws2 = temp_dir("lmsd-backup-b");
    let bundle = temp_dir("lmsd-bundle").join("college.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": ws1.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.import",
        json!({ "rows": [student_row("1", "Asha", "asha@x.edu", "Maths")] }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("lms-workspace-v1")
    );
    assert!(exported.get("dbSha256").and_then(|v| v.as_str()).is_some());

    // Restore into a fresh workspace and read the data back.
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": ws2.to_string_lossy() }),
    );
    let students = request_ok(&mut stdin, &mut reader, "5", "students.list", json!({}));
    assert_eq!(
        students.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    let students = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    let students = students.get("students").and_then(|v| v.as_array()).unwrap();
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["email"].as_str(), Some("asha@x.edu"));

    for p in [&ws1, &ws2] {
        let _ = std::fs::remove_dir_all(p);
    }
    let _ = std::fs::remove_dir_all(bundle.parent().unwrap());
}
