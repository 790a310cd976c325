use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar(home: &Path) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_presenced");
    let mut child = Command::new(exe)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_STATE_HOME", home.join("state"))
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn presenced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .pointer("/error/code")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn result_str(value: &serde_json::Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", pointer, value))
        .to_string()
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let home = temp_dir("presenced-router-home");
    let workspace = temp_dir("presenced-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let csv_out = workspace.join("smoke-report.csv");
    let xlsx_out = workspace.join("smoke-report.xlsx");
    let pdf_out = workspace.join("smoke-report.pdf");

    let (mut child, mut stdin, mut reader) = spawn_sidecar(&home);

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health.pointer("/ok").and_then(|v| v.as_bool()), Some(true));
    assert!(health.pointer("/result/workspacePath").map(|v| v.is_null()).unwrap_or(false));

    // Data methods need a workspace first.
    let early = request(&mut stdin, &mut reader, "2", "classGroups.list", json!({}));
    assert_eq!(
        early.pointer("/error/code").and_then(|v| v.as_str()),
        Some("no_workspace")
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let group = request(
        &mut stdin,
        &mut reader,
        "4",
        "classGroups.create",
        json!({ "name": "Smoke Group", "capacity": 30 }),
    );
    let group_id = result_str(&group, "/result/classGroupId");
    let _ = request(&mut stdin, &mut reader, "5", "classGroups.list", json!({}));

    let teacher = request(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.create",
        json!({ "username": "smoke", "fullName": "Smoke Teacher" }),
    );
    let teacher_id = result_str(&teacher, "/result/teacherId");
    let _ = request(&mut stdin, &mut reader, "7", "teachers.list", json!({}));

    let course = request(
        &mut stdin,
        &mut reader,
        "8",
        "courses.create",
        json!({ "name": "Smoke Course", "teacherId": teacher_id, "classGroupId": group_id }),
    );
    let course_id = result_str(&course, "/result/courseId");
    let _ = request(&mut stdin, &mut reader, "9", "courses.list", json!({}));

    let student = request(
        &mut stdin,
        &mut reader,
        "10",
        "students.create",
        json!({ "fullName": "Smoke Student", "classGroupId": group_id }),
    );
    let student_id = result_str(&student, "/result/studentId");
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "students.list",
        json!({ "classGroupId": group_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "students.importRoster",
        json!({ "classGroupId": group_id, "rows": [] }),
    );

    let session = request(
        &mut stdin,
        &mut reader,
        "13",
        "sessions.create",
        json!({ "courseId": course_id, "date": "2024-09-02", "startTime": "08:00" }),
    );
    let session_id = result_str(&session, "/result/sessionId");
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "sessions.list",
        json!({ "courseId": course_id }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "attendance.sessionOpen",
        json!({ "sessionId": session_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "attendance.takeRoll",
        json!({ "sessionId": session_id, "statuses": { student_id.clone(): "present" } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "attendance.setStatus",
        json!({ "sessionId": session_id, "studentId": student_id, "status": "late" }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "reports.courseStatistics",
        json!({ "courseId": course_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "19",
        "reports.teacherStatistics",
        json!({ "teacherId": teacher_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "reports.courseReportModel",
        json!({ "courseId": course_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "21",
        "reports.chartModel",
        json!({ "courseId": course_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "22",
        "exports.courseReportCsv",
        json!({ "courseId": course_id, "outPath": csv_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "23",
        "exports.courseWorkbook",
        json!({ "courseId": course_id, "outPath": xlsx_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "23b",
        "exports.courseReportPdf",
        json!({ "courseId": course_id, "outPath": pdf_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "24",
        "workspace.exportBundle",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "25",
        "workspace.importBundle",
        json!({ "inPath": bundle_out.to_string_lossy() }),
    );

    let unknown = {
        writeln!(stdin, "{}", json!({ "id": "26", "method": "nope.nothing", "params": {} }))
            .expect("write request");
        stdin.flush().expect("flush request");
        let mut line = String::new();
        reader.read_line(&mut line).expect("read response line");
        serde_json::from_str::<serde_json::Value>(line.trim()).expect("parse response json")
    };
    assert_eq!(
        unknown.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json response");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(bad.pointer("/error/code").and_then(|v| v.as_str()), Some("bad_json"));
    assert!(bad.get("id").is_none());

    drop(stdin);
    let _ = child.wait();

    assert!(csv_out.is_file());
    assert!(xlsx_out.is_file());
    assert!(pdf_out.is_file());
    assert!(bundle_out.is_file());
    assert!(home.join("config/presenced/config.toml").is_file());
    assert!(home.join("state/presenced/presenced.log").is_file());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(home);
}
