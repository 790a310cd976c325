use chrono::{NaiveDate, NaiveTime};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use super::error::{ok, HandlerErr};
use super::types::{AppState, Request};
use crate::calc::AttendanceStatus;
use crate::snapshot;

pub type HandlerResult = Result<Value, HandlerErr>;

pub fn respond(req: &Request, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            tracing::warn!(method = %req.method, code = e.code, "{}", e.message);
            e.response(&req.id)
        }
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Required and non-blank, trimmed.
pub fn required_text(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let v = required_str(params, key)?.trim().to_string();
    if v.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(v)
}

/// `Ok(None)` when absent or null; blank strings also count as null.
pub fn optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::bad_params(format!(
                    "{} must be string or null",
                    key
                )));
            };
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
    }
}

pub fn optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}

pub fn parse_date_param(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = required_str(params, key)?;
    snapshot::parse_date(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn parse_time_param(params: &Value, key: &str) -> Result<Option<NaiveTime>, HandlerErr> {
    let Some(raw) = optional_str(params, key)? else {
        return Ok(None);
    };
    snapshot::parse_time(&raw)
        .map(Some)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be HH:MM", key)))
}

pub fn parse_status(raw: &str) -> Result<AttendanceStatus, HandlerErr> {
    AttendanceStatus::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("status must be one of: present, late, absent, excused")
            .with_details(serde_json::json!({ "status": raw }))
    })
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now_string() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    Ok(conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

pub fn ensure_exists(conn: &Connection, table: &str, id: &str, what: &str) -> Result<(), HandlerErr> {
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(what))
    }
}

/// Attendance, then sessions, then the course itself.
pub fn delete_course_cascade(conn: &Connection, course_id: &str) -> Result<(), HandlerErr> {
    conn.execute(
        "DELETE FROM attendance
         WHERE session_id IN (SELECT id FROM sessions WHERE course_id = ?)",
        [course_id],
    )
    .map_err(|e| HandlerErr::db_write(e, "attendance"))?;
    conn.execute("DELETE FROM sessions WHERE course_id = ?", [course_id])
        .map_err(|e| HandlerErr::db_write(e, "sessions"))?;
    conn.execute("DELETE FROM courses WHERE id = ?", [course_id])
        .map_err(|e| HandlerErr::db_write(e, "courses"))?;
    Ok(())
}
