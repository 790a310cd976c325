use crate::ipc::access::{require_course_access, require_teacher_scope, resolve_actor};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    db_conn, delete_course_cascade, ensure_exists, new_id, optional_str, required_str,
    required_text, respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

const MIN_COURSE_NAME_CHARS: usize = 3;

fn validated_name(params: &Value) -> Result<String, HandlerErr> {
    let name = required_text(params, "name")?;
    if name.chars().count() < MIN_COURSE_NAME_CHARS {
        return Err(HandlerErr::bad_params(format!(
            "course name must be at least {} characters",
            MIN_COURSE_NAME_CHARS
        )));
    }
    Ok(name)
}

fn courses_list(conn: &Connection, params: &Value) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    let mut teacher_id = optional_str(params, "teacherId")?;
    if let Some(a) = actor.as_ref().filter(|a| !a.is_admin()) {
        // Teachers only ever see their own courses.
        require_teacher_scope(Some(a), teacher_id.as_deref().unwrap_or(&a.id))?;
        teacher_id = Some(a.id.clone());
    }

    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.teacher_id,
           t.full_name,
           c.class_group_id,
           g.name,
           (SELECT COUNT(*) FROM sessions s WHERE s.course_id = c.id) AS session_count
         FROM courses c
         JOIN teachers t ON t.id = c.teacher_id
         JOIN class_groups g ON g.id = c.class_group_id
         WHERE (?1 IS NULL OR c.teacher_id = ?1)
         ORDER BY c.name, c.id",
    )?;
    let courses = stmt
        .query_map([teacher_id.as_deref()], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let teacher_id: String = row.get(2)?;
            let teacher_name: String = row.get(3)?;
            let class_group_id: String = row.get(4)?;
            let class_group_name: String = row.get(5)?;
            let session_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "name": name,
                "teacherId": teacher_id,
                "teacherName": teacher_name,
                "classGroupId": class_group_id,
                "classGroupName": class_group_name,
                "sessionCount": session_count
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "courses": courses }))
}

fn courses_create(conn: &Connection, params: &Value) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    let name = validated_name(params)?;
    let class_group_id = required_str(params, "classGroupId")?;
    let teacher_id = match (optional_str(params, "teacherId")?, actor.as_ref()) {
        (Some(t), _) => t,
        (None, Some(a)) => a.id.clone(),
        (None, None) => return Err(HandlerErr::bad_params("missing teacherId")),
    };
    require_teacher_scope(actor.as_ref(), &teacher_id)?;
    ensure_exists(conn, "teachers", &teacher_id, "teacher")?;
    ensure_exists(conn, "class_groups", &class_group_id, "class group")?;

    let id = new_id();
    conn.execute(
        "INSERT INTO courses(id, name, teacher_id, class_group_id) VALUES(?, ?, ?, ?)",
        (&id, &name, &teacher_id, &class_group_id),
    )
    .map_err(|e| HandlerErr::db_write(e, "courses"))?;
    Ok(json!({ "courseId": id, "name": name, "teacherId": teacher_id }))
}

fn courses_update(conn: &Connection, params: &Value) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    let id = required_str(params, "courseId")?;
    require_course_access(conn, actor.as_ref(), &id)?;

    let tx = conn.unchecked_transaction()?;
    if params.get("name").is_some() {
        let name = validated_name(params)?;
        tx.execute("UPDATE courses SET name = ? WHERE id = ?", (&name, &id))
            .map_err(|e| HandlerErr::db_write(e, "courses"))?;
    }
    if let Some(class_group_id) = optional_str(params, "classGroupId")? {
        ensure_exists(&tx, "class_groups", &class_group_id, "class group")?;
        tx.execute(
            "UPDATE courses SET class_group_id = ? WHERE id = ?",
            (&class_group_id, &id),
        )
        .map_err(|e| HandlerErr::db_write(e, "courses"))?;
    }
    if let Some(teacher_id) = optional_str(params, "teacherId")? {
        require_teacher_scope(actor.as_ref(), &teacher_id)?;
        ensure_exists(&tx, "teachers", &teacher_id, "teacher")?;
        tx.execute(
            "UPDATE courses SET teacher_id = ? WHERE id = ?",
            (&teacher_id, &id),
        )
        .map_err(|e| HandlerErr::db_write(e, "courses"))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn courses_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    let id = required_str(params, "courseId")?;
    require_course_access(conn, actor.as_ref(), &id)?;

    let tx = conn.unchecked_transaction()?;
    delete_course_cascade(&tx, &id)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "courses.list" => courses_list,
        "courses.create" => courses_create,
        "courses.update" => courses_update,
        "courses.delete" => courses_delete,
        _ => return None,
    };
    Some(respond(
        req,
        db_conn(state).and_then(|conn| handler(conn, &req.params)),
    ))
}
