use std::collections::HashMap;

use crate::calc::AttendanceStatus;
use crate::ipc::access::{require_session_access, resolve_actor, SessionScope};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    db_conn, now_string, parse_status, required_str, respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn session_roster(
    conn: &Connection,
    class_group_id: &str,
    session_id: &str,
) -> Result<Vec<(String, String, Option<String>, Option<String>)>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.full_name, s.matricule, a.status
         FROM students s
         LEFT JOIN attendance a ON a.student_id = s.id AND a.session_id = ?
         WHERE s.class_group_id = ?
         ORDER BY s.full_name, s.id",
    )?;
    let rows = stmt
        .query_map((session_id, class_group_id), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn attendance_session_open(conn: &Connection, params: &Value) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    let session_id = required_str(params, "sessionId")?;
    let scope = require_session_access(conn, actor.as_ref(), &session_id)?;

    let (date, start_time, end_time): (String, Option<String>, Option<String>) = conn.query_row(
        "SELECT date, start_time, end_time FROM sessions WHERE id = ?",
        [&session_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;

    let roster = session_roster(conn, &scope.class_group_id, &session_id)?;
    let recorded = roster.iter().filter(|r| r.3.is_some()).count();
    let students: Vec<Value> = roster
        .into_iter()
        .map(|(id, full_name, matricule, status)| {
            json!({
                "studentId": id,
                "fullName": full_name,
                "matricule": matricule,
                "status": status
            })
        })
        .collect();

    Ok(json!({
        "session": {
            "id": session_id,
            "courseId": scope.course_id,
            "date": date,
            "startTime": start_time,
            "endTime": end_time,
            "cancelled": scope.cancelled
        },
        "recordedCount": recorded,
        "students": students
    }))
}

fn upsert_record(
    conn: &Connection,
    student_id: &str,
    session_id: &str,
    status: AttendanceStatus,
    now: &str,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO attendance(student_id, session_id, status, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id, session_id) DO UPDATE SET
           status = excluded.status,
           updated_at = excluded.updated_at",
        (student_id, session_id, status.as_str(), now),
    )
    .map_err(|e| HandlerErr::db_write(e, "attendance"))?;
    Ok(())
}

fn ensure_not_cancelled(scope: &SessionScope, session_id: &str) -> Result<(), HandlerErr> {
    if scope.cancelled {
        return Err(HandlerErr::new("conflict", "session is cancelled")
            .with_details(json!({ "sessionId": session_id })));
    }
    Ok(())
}

fn attendance_take_roll(state: &AppState, conn: &Connection, params: &Value) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    let session_id = required_str(params, "sessionId")?;
    let scope = require_session_access(conn, actor.as_ref(), &session_id)?;
    ensure_not_cancelled(&scope, &session_id)?;
    let default_status = state
        .config
        .default_status()
        .map_err(|e| HandlerErr::new("bad_params", format!("{e:#}")))?;

    let Some(raw_statuses) = params.get("statuses").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing statuses"));
    };
    let mut statuses: HashMap<String, AttendanceStatus> = HashMap::new();
    for (student_id, raw) in raw_statuses {
        let Some(s) = raw.as_str() else {
            return Err(HandlerErr::bad_params("statuses values must be strings")
                .with_details(json!({ "studentId": student_id })));
        };
        statuses.insert(student_id.clone(), parse_status(s)?);
    }

    let roster = session_roster(conn, &scope.class_group_id, &session_id)?;
    let unknown: Vec<&String> = statuses
        .keys()
        .filter(|id| !roster.iter().any(|r| r.0 == **id))
        .collect();
    if !unknown.is_empty() {
        return Err(
            HandlerErr::bad_params("student not in the session's class group")
                .with_details(json!({ "studentIds": unknown })),
        );
    }

    let now = now_string();
    let mut defaulted = 0_usize;
    let tx = conn.unchecked_transaction()?;
    for (student_id, _, _, _) in &roster {
        let status = match statuses.get(student_id) {
            Some(s) => *s,
            None => {
                defaulted += 1;
                default_status
            }
        };
        upsert_record(&tx, student_id, &session_id, status, &now)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tracing::debug!(
        session = %session_id,
        students = roster.len(),
        defaulted,
        "roll taken"
    );

    Ok(json!({
        "recorded": roster.len(),
        "defaulted": defaulted,
        "defaultStatus": default_status.as_str()
    }))
}

fn attendance_set_status(conn: &Connection, params: &Value) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    let session_id = required_str(params, "sessionId")?;
    let student_id = required_str(params, "studentId")?;
    let scope = require_session_access(conn, actor.as_ref(), &session_id)?;

    let group: Option<String> = conn
        .query_row(
            "SELECT class_group_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()?;
    match group {
        None => return Err(HandlerErr::not_found("student")),
        Some(g) if g != scope.class_group_id => {
            return Err(HandlerErr::bad_params(
                "student not in the session's class group",
            ))
        }
        Some(_) => {}
    }

    let status = match params.get("status") {
        None => return Err(HandlerErr::bad_params("missing status")),
        Some(Value::Null) => None,
        Some(Value::String(s)) => Some(parse_status(s)?),
        Some(_) => return Err(HandlerErr::bad_params("status must be string or null")),
    };

    match status {
        Some(s) => {
            ensure_not_cancelled(&scope, &session_id)?;
            upsert_record(conn, &student_id, &session_id, s, &now_string())?;
            Ok(json!({ "ok": true, "status": s.as_str() }))
        }
        None => {
            conn.execute(
                "DELETE FROM attendance WHERE student_id = ? AND session_id = ?",
                (&student_id, &session_id),
            )
            .map_err(|e| HandlerErr::db_write(e, "attendance"))?;
            Ok(json!({ "ok": true, "status": Value::Null }))
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let state: &AppState = state;
    let result = match req.method.as_str() {
        "attendance.sessionOpen" => {
            db_conn(state).and_then(|conn| attendance_session_open(conn, &req.params))
        }
        "attendance.takeRoll" => {
            db_conn(state).and_then(|conn| attendance_take_roll(state, conn, &req.params))
        }
        "attendance.setStatus" => {
            db_conn(state).and_then(|conn| attendance_set_status(conn, &req.params))
        }
        _ => return None,
    };
    Some(respond(req, result))
}
