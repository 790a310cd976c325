use crate::ipc::access::{require_admin, resolve_actor};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    db_conn, ensure_exists, new_id, now_string, optional_str, required_str, required_text,
    respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};

fn students_list(conn: &Connection, params: &Value) -> HandlerResult {
    resolve_actor(conn, params)?;
    let class_group_id = optional_str(params, "classGroupId")?;
    if let Some(g) = class_group_id.as_deref() {
        ensure_exists(conn, "class_groups", g, "class group")?;
    }
    let mut stmt = conn.prepare(
        "SELECT s.id, s.full_name, s.matricule, s.class_group_id, g.name
         FROM students s
         JOIN class_groups g ON g.id = s.class_group_id
         WHERE (?1 IS NULL OR s.class_group_id = ?1)
         ORDER BY s.full_name, s.id",
    )?;
    let students = stmt
        .query_map([class_group_id.as_deref()], |row| {
            let id: String = row.get(0)?;
            let full_name: String = row.get(1)?;
            let matricule: Option<String> = row.get(2)?;
            let class_group_id: String = row.get(3)?;
            let class_group_name: String = row.get(4)?;
            Ok(json!({
                "id": id,
                "fullName": full_name,
                "matricule": matricule,
                "classGroupId": class_group_id,
                "classGroupName": class_group_name
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &Value) -> HandlerResult {
    require_admin(resolve_actor(conn, params)?.as_ref())?;
    let full_name = required_text(params, "fullName")?;
    let matricule = optional_str(params, "matricule")?;
    let class_group_id = required_str(params, "classGroupId")?;
    ensure_exists(conn, "class_groups", &class_group_id, "class group")?;

    let id = new_id();
    conn.execute(
        "INSERT INTO students(id, full_name, matricule, class_group_id, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &full_name, &matricule, &class_group_id, now_string()),
    )
    .map_err(|e| HandlerErr::db_write(e, "students"))?;
    Ok(json!({ "studentId": id, "fullName": full_name }))
}

fn students_update(conn: &Connection, params: &Value) -> HandlerResult {
    require_admin(resolve_actor(conn, params)?.as_ref())?;
    let id = required_str(params, "studentId")?;
    ensure_exists(conn, "students", &id, "student")?;

    let tx = conn.unchecked_transaction()?;
    if params.get("fullName").is_some() {
        let full_name = required_text(params, "fullName")?;
        tx.execute(
            "UPDATE students SET full_name = ?, updated_at = ? WHERE id = ?",
            (&full_name, now_string(), &id),
        )
        .map_err(|e| HandlerErr::db_write(e, "students"))?;
    }
    if params.get("matricule").is_some() {
        let matricule = optional_str(params, "matricule")?;
        tx.execute(
            "UPDATE students SET matricule = ?, updated_at = ? WHERE id = ?",
            (&matricule, now_string(), &id),
        )
        .map_err(|e| HandlerErr::db_write(e, "students"))?;
    }
    if let Some(class_group_id) = optional_str(params, "classGroupId")? {
        ensure_exists(&tx, "class_groups", &class_group_id, "class group")?;
        tx.execute(
            "UPDATE students SET class_group_id = ?, updated_at = ? WHERE id = ?",
            (&class_group_id, now_string(), &id),
        )
        .map_err(|e| HandlerErr::db_write(e, "students"))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn students_delete(conn: &Connection, params: &Value) -> HandlerResult {
    require_admin(resolve_actor(conn, params)?.as_ref())?;
    let id = required_str(params, "studentId")?;
    ensure_exists(conn, "students", &id, "student")?;

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM attendance WHERE student_id = ?", [&id])
        .map_err(|e| HandlerErr::db_write(e, "attendance"))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db_write(e, "students"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportMode {
    CreateOnly,
    Upsert,
}

fn parse_import_mode(params: &Value) -> Result<ImportMode, HandlerErr> {
    match optional_str(params, "mode")?.as_deref() {
        None | Some("createOnly") => Ok(ImportMode::CreateOnly),
        Some("upsert") => Ok(ImportMode::Upsert),
        Some(other) => Err(HandlerErr::bad_params("mode must be one of: createOnly, upsert")
            .with_details(json!({ "mode": other }))),
    }
}

/// One roster line as handed over by the file-parsing front end.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterRow {
    #[serde(default)]
    matricule: Option<String>,
    #[serde(default)]
    surname: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ValidRosterRow {
    matricule: Option<String>,
    full_name: String,
}

fn non_empty_trimmed(s: Option<&str>) -> Option<String> {
    let t = s?.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

impl RosterRow {
    fn validate(&self) -> Result<ValidRosterRow, &'static str> {
        let Some(surname) = non_empty_trimmed(self.surname.as_deref()) else {
            return Err("surname is required");
        };
        let full_name = match non_empty_trimmed(self.given_name.as_deref()) {
            Some(given) => format!("{} {}", surname, given),
            None => surname,
        };
        Ok(ValidRosterRow {
            matricule: non_empty_trimmed(self.matricule.as_deref()),
            full_name,
        })
    }
}

fn students_import_roster(conn: &Connection, params: &Value) -> HandlerResult {
    require_admin(resolve_actor(conn, params)?.as_ref())?;
    let class_group_id = required_str(params, "classGroupId")?;
    ensure_exists(conn, "class_groups", &class_group_id, "class group")?;
    let mode = parse_import_mode(params)?;
    let Some(raw_rows) = params.get("rows").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing rows"));
    };

    let mut rejected: Vec<Value> = Vec::new();
    let mut valid: Vec<(usize, ValidRosterRow)> = Vec::new();
    for (idx, raw) in raw_rows.iter().enumerate() {
        let parsed: Result<ValidRosterRow, String> = serde_json::from_value::<RosterRow>(raw.clone())
            .map_err(|e| e.to_string())
            .and_then(|row| row.validate().map_err(|e| e.to_string()));
        match parsed {
            Ok(row) => valid.push((idx, row)),
            Err(reason) => rejected.push(json!({ "index": idx, "reason": reason })),
        }
    }

    let mut created = 0_usize;
    let mut updated = 0_usize;
    let mut skipped = 0_usize;
    let now = now_string();
    let tx = conn.unchecked_transaction()?;
    for (idx, row) in valid {
        let existing: Option<String> = match row.matricule.as_deref() {
            Some(m) => tx
                .query_row("SELECT id FROM students WHERE matricule = ?", [m], |r| {
                    r.get(0)
                })
                .optional()?,
            None => None,
        };
        match (existing, mode) {
            (Some(_), ImportMode::CreateOnly) => {
                skipped += 1;
            }
            (Some(student_id), ImportMode::Upsert) => {
                tx.execute(
                    "UPDATE students SET full_name = ?, class_group_id = ?, updated_at = ? WHERE id = ?",
                    (&row.full_name, &class_group_id, &now, &student_id),
                )
                .map_err(|e| {
                    HandlerErr::db_write(e, "students").with_details(json!({ "index": idx }))
                })?;
                updated += 1;
            }
            (None, _) => {
                tx.execute(
                    "INSERT INTO students(id, full_name, matricule, class_group_id, updated_at)
                     VALUES(?, ?, ?, ?, ?)",
                    (new_id(), &row.full_name, &row.matricule, &class_group_id, &now),
                )
                .map_err(|e| {
                    HandlerErr::db_write(e, "students").with_details(json!({ "index": idx }))
                })?;
                created += 1;
            }
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tracing::info!(
        class_group = %class_group_id,
        created,
        updated,
        skipped,
        rejected = rejected.len(),
        "roster imported"
    );

    Ok(json!({
        "created": created,
        "updated": updated,
        "skipped": skipped,
        "rejected": rejected
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "students.list" => students_list,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        "students.importRoster" => students_import_roster,
        _ => return None,
    };
    Some(respond(
        req,
        db_conn(state).and_then(|conn| handler(conn, &req.params)),
    ))
}
