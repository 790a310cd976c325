use crate::ipc::access::{require_admin, resolve_actor};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    db_conn, delete_course_cascade, ensure_exists, new_id, optional_str, required_str,
    required_text, respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_capacity(params: &Value) -> Result<Option<Option<i64>>, HandlerErr> {
    match params.get("capacity") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(Some(None)),
        Some(v) => match v.as_i64() {
            Some(n) if n > 0 => Ok(Some(Some(n))),
            _ => Err(HandlerErr::bad_params("capacity must be a positive integer or null")),
        },
    }
}

fn class_groups_list(conn: &Connection, params: &Value) -> HandlerResult {
    resolve_actor(conn, params)?;
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = conn.prepare(
        "SELECT
           g.id,
           g.name,
           g.capacity,
           (SELECT COUNT(*) FROM students s WHERE s.class_group_id = g.id) AS student_count,
           (SELECT COUNT(*) FROM courses c WHERE c.class_group_id = g.id) AS course_count
         FROM class_groups g
         ORDER BY g.name",
    )?;
    let groups = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let capacity: Option<i64> = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let course_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "capacity": capacity,
                "studentCount": student_count,
                "courseCount": course_count
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classGroups": groups }))
}

fn class_groups_create(conn: &Connection, params: &Value) -> HandlerResult {
    require_admin(resolve_actor(conn, params)?.as_ref())?;
    let name = required_text(params, "name")?;
    let capacity = parse_capacity(params)?.flatten();

    let id = new_id();
    conn.execute(
        "INSERT INTO class_groups(id, name, capacity) VALUES(?, ?, ?)",
        (&id, &name, capacity),
    )
    .map_err(|e| HandlerErr::db_write(e, "class_groups"))?;
    Ok(json!({ "classGroupId": id, "name": name }))
}

fn class_groups_update(conn: &Connection, params: &Value) -> HandlerResult {
    require_admin(resolve_actor(conn, params)?.as_ref())?;
    let id = required_str(params, "classGroupId")?;
    ensure_exists(conn, "class_groups", &id, "class group")?;

    let tx = conn.unchecked_transaction()?;
    if params.get("name").is_some() {
        let Some(name) = optional_str(params, "name")? else {
            return Err(HandlerErr::bad_params("name must not be empty"));
        };
        tx.execute("UPDATE class_groups SET name = ? WHERE id = ?", (&name, &id))
            .map_err(|e| HandlerErr::db_write(e, "class_groups"))?;
    }
    if let Some(capacity) = parse_capacity(params)? {
        tx.execute(
            "UPDATE class_groups SET capacity = ? WHERE id = ?",
            (capacity, &id),
        )
        .map_err(|e| HandlerErr::db_write(e, "class_groups"))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn class_groups_delete(conn: &Connection, params: &Value) -> HandlerResult {
    require_admin(resolve_actor(conn, params)?.as_ref())?;
    let id = required_str(params, "classGroupId")?;
    ensure_exists(conn, "class_groups", &id, "class group")?;

    let tx = conn.unchecked_transaction()?;
    let course_ids: Vec<String> = {
        let mut stmt = tx.prepare("SELECT id FROM courses WHERE class_group_id = ?")?;
        let ids = stmt
            .query_map([&id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        ids
    };
    for course_id in &course_ids {
        delete_course_cascade(&tx, course_id)?;
    }
    tx.execute(
        "DELETE FROM attendance
         WHERE student_id IN (SELECT id FROM students WHERE class_group_id = ?)",
        [&id],
    )
    .map_err(|e| HandlerErr::db_write(e, "attendance"))?;
    tx.execute("DELETE FROM students WHERE class_group_id = ?", [&id])
        .map_err(|e| HandlerErr::db_write(e, "students"))?;
    tx.execute("DELETE FROM class_groups WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db_write(e, "class_groups"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tracing::info!(class_group = %id, courses = course_ids.len(), "class group deleted");
    Ok(json!({ "ok": true, "deletedCourses": course_ids.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "classGroups.list" => class_groups_list,
        "classGroups.create" => class_groups_create,
        "classGroups.update" => class_groups_update,
        "classGroups.delete" => class_groups_delete,
        _ => return None,
    };
    Some(respond(
        req,
        db_conn(state).and_then(|conn| handler(conn, &req.params)),
    ))
}
