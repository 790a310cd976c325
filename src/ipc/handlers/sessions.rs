use crate::ipc::access::{require_course_access, require_session_access, resolve_actor};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    db_conn, new_id, optional_bool, optional_str, parse_date_param, parse_time_param,
    required_str, respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::snapshot::{self, DATE_FORMAT, TIME_FORMAT};
use chrono::NaiveTime;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn check_time_order(start: Option<NaiveTime>, end: Option<NaiveTime>) -> Result<(), HandlerErr> {
    match (start, end) {
        (Some(s), Some(e)) if e <= s => Err(HandlerErr::bad_params(
            "endTime must be after startTime",
        )
        .with_details(json!({
            "startTime": s.format(TIME_FORMAT).to_string(),
            "endTime": e.format(TIME_FORMAT).to_string()
        }))),
        _ => Ok(()),
    }
}

fn fmt_time(t: Option<NaiveTime>) -> Option<String> {
    t.map(|t| t.format(TIME_FORMAT).to_string())
}

fn sessions_list(conn: &Connection, params: &Value) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    let course_id = required_str(params, "courseId")?;
    require_course_access(conn, actor.as_ref(), &course_id)?;

    let mut stmt = conn.prepare(
        "SELECT
           s.id,
           s.date,
           s.start_time,
           s.end_time,
           s.description,
           s.cancelled,
           (SELECT COUNT(*) FROM attendance a WHERE a.session_id = s.id) AS record_count
         FROM sessions s
         WHERE s.course_id = ?
         ORDER BY s.date, COALESCE(s.start_time, ''), s.id",
    )?;
    let sessions = stmt
        .query_map([&course_id], |row| {
            let id: String = row.get(0)?;
            let date: String = row.get(1)?;
            let start_time: Option<String> = row.get(2)?;
            let end_time: Option<String> = row.get(3)?;
            let description: Option<String> = row.get(4)?;
            let cancelled: i64 = row.get(5)?;
            let record_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "date": date,
                "startTime": start_time,
                "endTime": end_time,
                "description": description,
                "cancelled": cancelled != 0,
                "recordCount": record_count
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "sessions": sessions }))
}

fn sessions_create(conn: &Connection, params: &Value) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    let course_id = required_str(params, "courseId")?;
    require_course_access(conn, actor.as_ref(), &course_id)?;

    let date = parse_date_param(params, "date")?;
    let start = parse_time_param(params, "startTime")?;
    let end = parse_time_param(params, "endTime")?;
    check_time_order(start, end)?;
    let description = optional_str(params, "description")?;
    let cancelled = optional_bool(params, "cancelled")?.unwrap_or(false);

    let id = new_id();
    conn.execute(
        "INSERT INTO sessions(id, course_id, date, start_time, end_time, description, cancelled)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &course_id,
            date.format(DATE_FORMAT).to_string(),
            fmt_time(start),
            fmt_time(end),
            &description,
            cancelled as i64,
        ),
    )
    .map_err(|e| HandlerErr::db_write(e, "sessions"))?;
    Ok(json!({ "sessionId": id }))
}

fn sessions_update(conn: &Connection, params: &Value) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    let id = required_str(params, "sessionId")?;
    require_session_access(conn, actor.as_ref(), &id)?;

    let current: Option<(Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT start_time, end_time FROM sessions WHERE id = ?",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((cur_start, cur_end)) = current else {
        return Err(HandlerErr::not_found("session"));
    };

    // Times are validated against whatever the update leaves in place.
    let start = if params.get("startTime").is_some() {
        parse_time_param(params, "startTime")?
    } else {
        cur_start.as_deref().and_then(snapshot::parse_time)
    };
    let end = if params.get("endTime").is_some() {
        parse_time_param(params, "endTime")?
    } else {
        cur_end.as_deref().and_then(snapshot::parse_time)
    };
    check_time_order(start, end)?;

    let tx = conn.unchecked_transaction()?;
    if params.get("date").is_some() {
        let date = parse_date_param(params, "date")?;
        tx.execute(
            "UPDATE sessions SET date = ? WHERE id = ?",
            (date.format(DATE_FORMAT).to_string(), &id),
        )
        .map_err(|e| HandlerErr::db_write(e, "sessions"))?;
    }
    tx.execute(
        "UPDATE sessions SET start_time = ?, end_time = ? WHERE id = ?",
        (fmt_time(start), fmt_time(end), &id),
    )
    .map_err(|e| HandlerErr::db_write(e, "sessions"))?;
    if params.get("description").is_some() {
        let description = optional_str(params, "description")?;
        tx.execute(
            "UPDATE sessions SET description = ? WHERE id = ?",
            (&description, &id),
        )
        .map_err(|e| HandlerErr::db_write(e, "sessions"))?;
    }
    let mut excluded_records = None;
    if let Some(cancelled) = optional_bool(params, "cancelled")? {
        tx.execute(
            "UPDATE sessions SET cancelled = ? WHERE id = ?",
            (cancelled as i64, &id),
        )
        .map_err(|e| HandlerErr::db_write(e, "sessions"))?;
        if cancelled {
            let records: i64 = tx.query_row(
                "SELECT COUNT(*) FROM attendance WHERE session_id = ?",
                [&id],
                |r| r.get(0),
            )?;
            if records > 0 {
                tracing::warn!(
                    session = %id,
                    records,
                    "cancelled session keeps records that reports now leave out"
                );
            }
            excluded_records = Some(records);
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut result = json!({ "ok": true });
    if let Some(records) = excluded_records {
        result["excludedRecords"] = json!(records);
    }
    Ok(result)
}

fn sessions_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    let id = required_str(params, "sessionId")?;
    require_session_access(conn, actor.as_ref(), &id)?;

    let tx = conn.unchecked_transaction()?;
    let removed = tx
        .execute("DELETE FROM attendance WHERE session_id = ?", [&id])
        .map_err(|e| HandlerErr::db_write(e, "attendance"))?;
    tx.execute("DELETE FROM sessions WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db_write(e, "sessions"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({ "ok": true, "deletedRecords": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "sessions.list" => sessions_list,
        "sessions.create" => sessions_create,
        "sessions.update" => sessions_update,
        "sessions.delete" => sessions_delete,
        _ => return None,
    };
    Some(respond(
        req,
        db_conn(state).and_then(|conn| handler(conn, &req.params)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(h, m, 0)
    }

    #[test]
    fn end_time_must_follow_start_time() {
        assert!(check_time_order(t(8, 0), t(10, 0)).is_ok());
        assert!(check_time_order(t(8, 0), None).is_ok());
        assert!(check_time_order(None, t(8, 0)).is_ok());
        let e = check_time_order(t(10, 0), t(10, 0)).expect_err("equal times");
        assert_eq!(e.code, "bad_params");
        assert!(check_time_order(t(10, 0), t(9, 0)).is_err());
    }
}
