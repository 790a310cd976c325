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

struct Sidecar {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn start(home: &Path) -> Self {
        let (child, stdin, reader) = spawn_sidecar(home);
        Self {
            _child: child,
            stdin,
            reader,
            next_id: 0,
        }
    }

    fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    fn err_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .pointer("/error/code")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    }
}

fn s(v: &serde_json::Value, pointer: &str) -> String {
    v.pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", pointer, v))
        .to_string()
}

struct Fixture {
    course_id: String,
    group_id: String,
    teacher_id: String,
}

fn course_fixture(sc: &mut Sidecar, workspace: &Path) -> Fixture {
    sc.ok("workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let group = sc.ok("classGroups.create", json!({ "name": "L1 Science" }));
    let group_id = s(&group, "/classGroupId");
    let teacher = sc.ok(
        "teachers.create",
        json!({ "username": "diallo", "fullName": "M. Diallo" }),
    );
    let teacher_id = s(&teacher, "/teacherId");
    let course = sc.ok(
        "courses.create",
        json!({ "name": "Chemistry", "teacherId": teacher_id, "classGroupId": group_id }),
    );
    Fixture {
        course_id: s(&course, "/courseId"),
        group_id,
        teacher_id,
    }
}

fn add_student(sc: &mut Sidecar, group_id: &str, name: &str) -> String {
    let r = sc.ok(
        "students.create",
        json!({ "fullName": name, "classGroupId": group_id }),
    );
    s(&r, "/studentId")
}

fn add_session(sc: &mut Sidecar, course_id: &str, date: &str) -> String {
    let r = sc.ok(
        "sessions.create",
        json!({ "courseId": course_id, "date": date, "startTime": "08:00", "endTime": "10:00" }),
    );
    s(&r, "/sessionId")
}

fn student_stats<'a>(stats: &'a serde_json::Value, student_id: &str) -> &'a serde_json::Value {
    stats
        .pointer("/statistics/students")
        .and_then(|v| v.as_array())
        .and_then(|rows| {
            rows.iter()
                .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(student_id))
        })
        .unwrap_or_else(|| panic!("no statistics for {}", student_id))
}

#[test]
fn late_counts_as_attended_and_report_ranks_by_rate() {
    let home = temp_dir("presenced-att-home");
    let workspace = temp_dir("presenced-att-rank");
    let mut sc = Sidecar::start(&home);
    let fx = course_fixture(&mut sc, &workspace);

    let b = add_student(&mut sc, &fx.group_id, "Amadou Ba");
    let a = add_student(&mut sc, &fx.group_id, "Zoe Ndiaye");
    let s1 = add_session(&mut sc, &fx.course_id, "2024-09-02");
    let s2 = add_session(&mut sc, &fx.course_id, "2024-09-09");
    let s3 = add_session(&mut sc, &fx.course_id, "2024-09-16");

    for (session, a_status, b_status) in [
        (&s1, "present", "present"),
        (&s2, "present", "absent"),
        (&s3, "late", "absent"),
    ] {
        sc.ok(
            "attendance.takeRoll",
            json!({
                "sessionId": session,
                "statuses": { a.clone(): a_status, b.clone(): b_status }
            }),
        );
    }

    let stats = sc.ok("reports.courseStatistics", json!({ "courseId": fx.course_id }));
    assert_eq!(
        stats.pointer("/statistics/totalSessions").and_then(|v| v.as_u64()),
        Some(3)
    );
    let a_stats = student_stats(&stats, &a);
    assert_eq!(a_stats.pointer("/counts/present").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(a_stats.pointer("/counts/late").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(a_stats.get("attendanceRate").and_then(|v| v.as_f64()), Some(100.0));
    let b_stats = student_stats(&stats, &b);
    assert_eq!(b_stats.get("attendanceRate").and_then(|v| v.as_f64()), Some(33.33));
    assert_eq!(
        stats.pointer("/statistics/totals/absent").and_then(|v| v.as_u64()),
        Some(2)
    );

    // Ranked by rate even though "Amadou Ba" sorts first by name.
    let model = sc.ok("reports.courseReportModel", json!({ "courseId": fx.course_id }));
    let rows = model.get("rows").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(rows[0].get("studentId").and_then(|v| v.as_str()), Some(a.as_str()));
    assert_eq!(rows[0].get("rateLabel").and_then(|v| v.as_str()), Some("100.00%"));
    assert_eq!(rows[1].get("studentId").and_then(|v| v.as_str()), Some(b.as_str()));
    assert_eq!(rows[1].get("rateLabel").and_then(|v| v.as_str()), Some("33.33%"));
    assert_eq!(
        model.pointer("/header/classGroupName"),
        Some(&json!("L1 Science"))
    );
    assert_eq!(model.pointer("/header/teacherName"), Some(&json!("M. Diallo")));
    assert_eq!(model.pointer("/header/totalSessions"), Some(&json!(3)));

    // The chart keeps roster order (alphabetical), not ranking order.
    let chart = sc.ok("reports.chartModel", json!({ "courseId": fx.course_id }));
    let labels: Vec<&str> = chart
        .get("points")
        .and_then(|v| v.as_array())
        .expect("points")
        .iter()
        .filter_map(|p| p.get("label").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(labels, vec!["Amadou Ba", "Zoe Ndiaye"]);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(home);
}

#[test]
fn missing_record_counts_in_denominator_and_empty_scopes_report_zero() {
    let home = temp_dir("presenced-att-home");
    let workspace = temp_dir("presenced-att-missing");
    let mut sc = Sidecar::start(&home);
    let fx = course_fixture(&mut sc, &workspace);

    // No students, no sessions: reportable, all zero.
    let empty = sc.ok("reports.courseStatistics", json!({ "courseId": fx.course_id }));
    assert_eq!(
        empty.pointer("/statistics/totalSessions").and_then(|v| v.as_u64()),
        Some(0)
    );
    assert_eq!(
        empty
            .pointer("/statistics/students")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(0)
    );
    for key in ["present", "late", "absent", "excused"] {
        assert_eq!(
            empty
                .pointer(&format!("/statistics/totals/{}", key))
                .and_then(|v| v.as_u64()),
            Some(0)
        );
    }

    // A student but still no sessions: rate 0, not an error.
    let st = add_student(&mut sc, &fx.group_id, "Awa Sow");
    let no_sessions = sc.ok("reports.courseStatistics", json!({ "courseId": fx.course_id }));
    let row = student_stats(&no_sessions, &st);
    assert_eq!(row.get("attendanceRate").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(row.get("hasRecords").and_then(|v| v.as_bool()), Some(false));

    let s1 = add_session(&mut sc, &fx.course_id, "2024-10-01");
    let _s2 = add_session(&mut sc, &fx.course_id, "2024-10-08");
    sc.ok(
        "attendance.setStatus",
        json!({ "sessionId": s1, "studentId": st, "status": "present" }),
    );

    let stats = sc.ok("reports.courseStatistics", json!({ "courseId": fx.course_id }));
    let row = student_stats(&stats, &st);
    assert_eq!(row.pointer("/counts/present").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(row.get("recordedSessions").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(row.get("attendanceRate").and_then(|v| v.as_f64()), Some(50.0));

    // Clearing the record takes the student back to "no records".
    sc.ok(
        "attendance.setStatus",
        json!({ "sessionId": s1, "studentId": st, "status": null }),
    );
    let cleared = sc.ok("reports.courseStatistics", json!({ "courseId": fx.course_id }));
    assert_eq!(
        student_stats(&cleared, &st)
            .get("hasRecords")
            .and_then(|v| v.as_bool()),
        Some(false)
    );

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(home);
}

#[test]
fn take_roll_defaults_omitted_students_to_absent_and_validates_input() {
    let home = temp_dir("presenced-att-home");
    let workspace = temp_dir("presenced-att-roll");
    let mut sc = Sidecar::start(&home);
    let fx = course_fixture(&mut sc, &workspace);

    let here = add_student(&mut sc, &fx.group_id, "Fatou Diop");
    let away = add_student(&mut sc, &fx.group_id, "Ousmane Fall");
    let session = add_session(&mut sc, &fx.course_id, "2024-11-04");

    let opened = sc.ok("attendance.sessionOpen", json!({ "sessionId": session }));
    assert_eq!(opened.get("recordedCount").and_then(|v| v.as_u64()), Some(0));
    assert!(opened
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students")
        .iter()
        .all(|st| st.get("status").map(|v| v.is_null()).unwrap_or(false)));

    let roll = sc.ok(
        "attendance.takeRoll",
        json!({ "sessionId": session, "statuses": { here.clone(): "present" } }),
    );
    assert_eq!(roll.get("recorded").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(roll.get("defaulted").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(roll.get("defaultStatus").and_then(|v| v.as_str()), Some("absent"));

    let opened = sc.ok("attendance.sessionOpen", json!({ "sessionId": session }));
    let status_of = |id: &str| {
        opened
            .get("students")
            .and_then(|v| v.as_array())
            .and_then(|rows| {
                rows.iter()
                    .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(id))
            })
            .and_then(|r| r.get("status").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
    };
    assert_eq!(status_of(&here).as_deref(), Some("present"));
    assert_eq!(status_of(&away).as_deref(), Some("absent"));

    // Retaking the roll overwrites instead of duplicating.
    sc.ok(
        "attendance.takeRoll",
        json!({
            "sessionId": session,
            "statuses": { here.clone(): "late", away.clone(): "excused" }
        }),
    );
    let stats = sc.ok("reports.courseStatistics", json!({ "courseId": fx.course_id }));
    assert_eq!(
        student_stats(&stats, &here)
            .get("recordedSessions")
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        stats.pointer("/statistics/totals/excused").and_then(|v| v.as_u64()),
        Some(1)
    );

    assert_eq!(
        sc.err_code(
            "attendance.takeRoll",
            json!({ "sessionId": session, "statuses": { here.clone(): "sleeping" } }),
        ),
        "bad_params"
    );

    let other_group = sc.ok("classGroups.create", json!({ "name": "L2 Lettres" }));
    let outsider = add_student(&mut sc, &s(&other_group, "/classGroupId"), "Outsider");
    assert_eq!(
        sc.err_code(
            "attendance.takeRoll",
            json!({ "sessionId": session, "statuses": { outsider.clone(): "present" } }),
        ),
        "bad_params"
    );
    assert_eq!(
        sc.err_code(
            "attendance.setStatus",
            json!({ "sessionId": session, "studentId": outsider, "status": "present" }),
        ),
        "bad_params"
    );
    assert_eq!(
        sc.err_code(
            "attendance.sessionOpen",
            json!({ "sessionId": "no-such-session" }),
        ),
        "not_found"
    );

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(home);
}

#[test]
fn cancelled_sessions_are_excluded_unless_requested() {
    let home = temp_dir("presenced-att-home");
    let workspace = temp_dir("presenced-att-cancelled");
    let mut sc = Sidecar::start(&home);
    let fx = course_fixture(&mut sc, &workspace);

    let st = add_student(&mut sc, &fx.group_id, "Mariama Kane");
    let held = add_session(&mut sc, &fx.course_id, "2024-09-02");
    let dropped = add_session(&mut sc, &fx.course_id, "2024-09-09");
    sc.ok(
        "attendance.setStatus",
        json!({ "sessionId": held, "studentId": st, "status": "present" }),
    );
    let cancelled = sc.ok(
        "sessions.update",
        json!({ "sessionId": dropped, "cancelled": true }),
    );
    assert_eq!(cancelled.get("excludedRecords").and_then(|v| v.as_i64()), Some(0));

    let default_view = sc.ok("reports.courseStatistics", json!({ "courseId": fx.course_id }));
    assert_eq!(
        default_view.get("includeCancelled").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        default_view
            .pointer("/statistics/totalSessions")
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        student_stats(&default_view, &st)
            .get("attendanceRate")
            .and_then(|v| v.as_f64()),
        Some(100.0)
    );

    let with_cancelled = sc.ok(
        "reports.courseStatistics",
        json!({ "courseId": fx.course_id, "includeCancelled": true }),
    );
    assert_eq!(
        with_cancelled
            .pointer("/statistics/totalSessions")
            .and_then(|v| v.as_u64()),
        Some(2)
    );
    assert_eq!(
        student_stats(&with_cancelled, &st)
            .get("attendanceRate")
            .and_then(|v| v.as_f64()),
        Some(50.0)
    );

    let per_teacher = sc.ok(
        "reports.teacherStatistics",
        json!({ "teacherId": fx.teacher_id }),
    );
    let courses = per_teacher
        .get("courses")
        .and_then(|v| v.as_array())
        .expect("courses");
    assert_eq!(courses.len(), 1);
    assert_eq!(
        courses[0]
            .pointer("/statistics/totalSessions")
            .and_then(|v| v.as_u64()),
        Some(1)
    );

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(home);
}

#[test]
fn cancelled_sessions_refuse_new_attendance() {
    let home = temp_dir("presenced-att-home");
    let workspace = temp_dir("presenced-att-cancel-roll");
    let mut sc = Sidecar::start(&home);
    let fx = course_fixture(&mut sc, &workspace);

    let st = add_student(&mut sc, &fx.group_id, "Ousmane Ba");
    let session = add_session(&mut sc, &fx.course_id, "2024-10-07");
    sc.ok(
        "attendance.setStatus",
        json!({ "sessionId": session, "studentId": st, "status": "late" }),
    );

    // Existing records are reported back when the session gets cancelled.
    let cancelled = sc.ok(
        "sessions.update",
        json!({ "sessionId": session, "cancelled": true }),
    );
    assert_eq!(cancelled.get("excludedRecords").and_then(|v| v.as_i64()), Some(1));

    assert_eq!(
        sc.err_code(
            "attendance.takeRoll",
            json!({ "sessionId": session, "statuses": {} }),
        ),
        "conflict"
    );
    assert_eq!(
        sc.err_code(
            "attendance.setStatus",
            json!({ "sessionId": session, "studentId": st, "status": "present" }),
        ),
        "conflict"
    );
    sc.ok(
        "attendance.setStatus",
        json!({ "sessionId": session, "studentId": st, "status": null }),
    );

    let reopened = sc.ok(
        "sessions.update",
        json!({ "sessionId": session, "cancelled": false }),
    );
    assert!(reopened.get("excludedRecords").is_none());
    let roll = sc.ok(
        "attendance.takeRoll",
        json!({ "sessionId": session, "statuses": { st.clone(): "present" } }),
    );
    assert_eq!(roll.get("recorded").and_then(|v| v.as_u64()), Some(1));

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(home);
}

#[test]
fn session_validation_and_delete_cascade() {
    let home = temp_dir("presenced-att-home");
    let workspace = temp_dir("presenced-att-sessions");
    let mut sc = Sidecar::start(&home);
    let fx = course_fixture(&mut sc, &workspace);

    assert_eq!(
        sc.err_code(
            "sessions.create",
            json!({ "courseId": fx.course_id, "date": "2024-02-30" }),
        ),
        "bad_params"
    );
    assert_eq!(
        sc.err_code(
            "sessions.create",
            json!({
                "courseId": fx.course_id,
                "date": "2024-03-01",
                "startTime": "10:00",
                "endTime": "09:00"
            }),
        ),
        "bad_params"
    );

    let st = add_student(&mut sc, &fx.group_id, "Ibrahima Sy");
    let session = add_session(&mut sc, &fx.course_id, "2024-03-01");
    assert_eq!(
        sc.err_code(
            "sessions.update",
            json!({ "sessionId": session, "endTime": "07:00" }),
        ),
        "bad_params"
    );
    sc.ok(
        "attendance.setStatus",
        json!({ "sessionId": session, "studentId": st, "status": "present" }),
    );

    let listed = sc.ok("sessions.list", json!({ "courseId": fx.course_id }));
    let rows = listed.get("sessions").and_then(|v| v.as_array()).expect("sessions");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("recordCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(rows[0].get("startTime").and_then(|v| v.as_str()), Some("08:00"));

    let deleted = sc.ok("sessions.delete", json!({ "sessionId": session }));
    assert_eq!(deleted.get("deletedRecords").and_then(|v| v.as_u64()), Some(1));
    let stats = sc.ok("reports.courseStatistics", json!({ "courseId": fx.course_id }));
    assert_eq!(
        stats.pointer("/statistics/totalSessions").and_then(|v| v.as_u64()),
        Some(0)
    );

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(home);
}
