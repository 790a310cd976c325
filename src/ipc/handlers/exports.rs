use crate::export;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{db_conn, required_str, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::report;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

use super::reports::{course_statistics, header_for};

fn out_path(params: &Value) -> Result<PathBuf, HandlerErr> {
    required_str(params, "outPath").map(PathBuf::from)
}

fn export_failed(e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("export_failed", format!("{e:#}"))
}

fn exports_course_workbook(state: &AppState, conn: &Connection, params: &Value) -> HandlerResult {
    let path = out_path(params)?;
    let (snap, stats) = course_statistics(state, conn, params)?;
    let header = header_for(&snap, &stats);
    let summary =
        export::write_course_workbook(&path, &snap, &stats, &header).map_err(export_failed)?;
    Ok(json!({
        "path": path.to_string_lossy(),
        "sheetCount": summary.sheet_count,
        "studentRows": summary.student_rows,
        "sessionColumns": summary.session_columns
    }))
}

fn exports_course_report_csv(
    state: &AppState,
    conn: &Connection,
    params: &Value,
) -> HandlerResult {
    let path = out_path(params)?;
    let (snap, stats) = course_statistics(state, conn, params)?;
    let header = header_for(&snap, &stats);
    let rows = report::report_rows(&stats);
    let rows_exported = export::write_report_csv(&path, &header, &rows).map_err(export_failed)?;
    Ok(json!({
        "path": path.to_string_lossy(),
        "rowsExported": rows_exported
    }))
}

fn exports_course_report_pdf(
    state: &AppState,
    conn: &Connection,
    params: &Value,
) -> HandlerResult {
    let path = out_path(params)?;
    let (snap, stats) = course_statistics(state, conn, params)?;
    let model = report::course_report_model(&stats, header_for(&snap, &stats));
    let summary = export::write_report_pdf(&path, &model).map_err(export_failed)?;
    Ok(json!({
        "path": path.to_string_lossy(),
        "pages": summary.pages,
        "rowsExported": summary.rows
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&AppState, &Connection, &Value) -> HandlerResult = match req.method.as_str()
    {
        "exports.courseWorkbook" => exports_course_workbook,
        "exports.courseReportCsv" => exports_course_report_csv,
        "exports.courseReportPdf" => exports_course_report_pdf,
        _ => return None,
    };
    let state: &AppState = state;
    Some(respond(
        req,
        db_conn(state).and_then(|conn| handler(state, conn, &req.params)),
    ))
}
