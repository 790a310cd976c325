use crate::ipc::access::{require_admin, resolve_actor, Role};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    db_conn, delete_course_cascade, ensure_exists, new_id, optional_str, required_str,
    required_text, respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_role(params: &Value) -> Result<Option<Role>, HandlerErr> {
    let Some(raw) = optional_str(params, "role")? else {
        return Ok(None);
    };
    Role::parse(&raw)
        .map(Some)
        .ok_or_else(|| HandlerErr::bad_params("role must be one of: admin, teacher"))
}

fn teachers_list(conn: &Connection, params: &Value) -> HandlerResult {
    resolve_actor(conn, params)?;
    let role_filter = parse_role(params)?;
    let mut stmt = conn.prepare(
        "SELECT
           t.id,
           t.username,
           t.full_name,
           t.role,
           (SELECT COUNT(*) FROM courses c WHERE c.teacher_id = t.id) AS course_count
         FROM teachers t
         WHERE (?1 IS NULL OR t.role = ?1)
         ORDER BY t.full_name, t.username",
    )?;
    let teachers = stmt
        .query_map([role_filter.map(Role::as_str)], |row| {
            let id: String = row.get(0)?;
            let username: String = row.get(1)?;
            let full_name: String = row.get(2)?;
            let role: String = row.get(3)?;
            let course_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "username": username,
                "fullName": full_name,
                "role": role,
                "courseCount": course_count
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "teachers": teachers }))
}

fn teachers_create(conn: &Connection, params: &Value) -> HandlerResult {
    require_admin(resolve_actor(conn, params)?.as_ref())?;
    let username = required_text(params, "username")?;
    let full_name = optional_str(params, "fullName")?.unwrap_or_else(|| username.clone());
    let role = parse_role(params)?.unwrap_or(Role::Teacher);

    let id = new_id();
    conn.execute(
        "INSERT INTO teachers(id, username, full_name, role) VALUES(?, ?, ?, ?)",
        (&id, &username, &full_name, role.as_str()),
    )
    .map_err(|e| HandlerErr::db_write(e, "teachers"))?;
    Ok(json!({ "teacherId": id, "username": username, "role": role.as_str() }))
}

fn teachers_update(conn: &Connection, params: &Value) -> HandlerResult {
    require_admin(resolve_actor(conn, params)?.as_ref())?;
    let id = required_str(params, "teacherId")?;
    ensure_exists(conn, "teachers", &id, "teacher")?;

    let tx = conn.unchecked_transaction()?;
    if params.get("username").is_some() {
        let username = required_text(params, "username")?;
        tx.execute("UPDATE teachers SET username = ? WHERE id = ?", (&username, &id))
            .map_err(|e| HandlerErr::db_write(e, "teachers"))?;
    }
    if params.get("fullName").is_some() {
        let full_name = required_text(params, "fullName")?;
        tx.execute("UPDATE teachers SET full_name = ? WHERE id = ?", (&full_name, &id))
            .map_err(|e| HandlerErr::db_write(e, "teachers"))?;
    }
    if let Some(role) = parse_role(params)? {
        tx.execute("UPDATE teachers SET role = ? WHERE id = ?", (role.as_str(), &id))
            .map_err(|e| HandlerErr::db_write(e, "teachers"))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn teachers_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    require_admin(actor.as_ref())?;
    let id = required_str(params, "teacherId")?;
    ensure_exists(conn, "teachers", &id, "teacher")?;
    if actor.as_ref().map(|a| a.id == id).unwrap_or(false) {
        return Err(HandlerErr::forbidden("cannot delete yourself"));
    }

    let tx = conn.unchecked_transaction()?;
    let course_ids: Vec<String> = {
        let mut stmt = tx.prepare("SELECT id FROM courses WHERE teacher_id = ?")?;
        let ids = stmt
            .query_map([&id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        ids
    };
    for course_id in &course_ids {
        delete_course_cascade(&tx, course_id)?;
    }
    tx.execute("DELETE FROM teachers WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db_write(e, "teachers"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({ "ok": true, "deletedCourses": course_ids.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "teachers.list" => teachers_list,
        "teachers.create" => teachers_create,
        "teachers.update" => teachers_update,
        "teachers.delete" => teachers_delete,
        _ => return None,
    };
    Some(respond(
        req,
        db_conn(state).and_then(|conn| handler(conn, &req.params)),
    ))
}
