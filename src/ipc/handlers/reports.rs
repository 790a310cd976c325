use crate::calc::{self, CourseStatistics};
use crate::ipc::access::{require_course_access, require_teacher_scope, resolve_actor};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{db_conn, optional_bool, required_str, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, ReportHeader};
use crate::snapshot::{self, CourseSnapshot, SnapshotOptions};
use rusqlite::Connection;
use serde_json::{json, Value};

/// `includeCancelled` from the request, else the configured default.
pub(super) fn snapshot_options(
    state: &AppState,
    params: &Value,
) -> Result<SnapshotOptions, HandlerErr> {
    Ok(SnapshotOptions {
        include_cancelled: optional_bool(params, "includeCancelled")?
            .unwrap_or(state.config.include_cancelled),
    })
}

/// Access-checked snapshot of one course plus its statistics.
pub(super) fn course_statistics(
    state: &AppState,
    conn: &Connection,
    params: &Value,
) -> Result<(CourseSnapshot, CourseStatistics), HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let course_id = required_str(params, "courseId")?;
    require_course_access(conn, actor.as_ref(), &course_id)?;
    let options = snapshot_options(state, params)?;

    let snap = snapshot::load_course_snapshot(conn, &course_id, options)?;
    let stats = calc::compute_course_statistics(
        &snap.course,
        &snap.sessions,
        &snap.students,
        &snap.records,
    );
    Ok((snap, stats))
}

pub(super) fn header_for(snap: &CourseSnapshot, stats: &CourseStatistics) -> ReportHeader {
    report::report_header(
        stats,
        &snap.class_group_name,
        Some(snap.teacher_name.as_str()),
        chrono::Local::now().naive_local(),
    )
}

fn reports_course_statistics(state: &AppState, conn: &Connection, params: &Value) -> HandlerResult {
    let (snap, stats) = course_statistics(state, conn, params)?;
    Ok(json!({
        "course": snap.course,
        "classGroupName": snap.class_group_name,
        "teacherId": snap.teacher_id,
        "teacherName": snap.teacher_name,
        "sessions": snap.sessions,
        "includeCancelled": snapshot_options(state, params)?.include_cancelled,
        "statistics": stats
    }))
}

fn reports_teacher_statistics(
    state: &AppState,
    conn: &Connection,
    params: &Value,
) -> HandlerResult {
    let actor = resolve_actor(conn, params)?;
    let teacher_id = required_str(params, "teacherId")?;
    require_teacher_scope(actor.as_ref(), &teacher_id)?;
    let options = snapshot_options(state, params)?;

    let mut courses = Vec::new();
    for course_id in snapshot::teacher_course_ids(conn, &teacher_id)? {
        let snap = snapshot::load_course_snapshot(conn, &course_id, options)?;
        let stats = calc::compute_course_statistics(
            &snap.course,
            &snap.sessions,
            &snap.students,
            &snap.records,
        );
        courses.push(json!({
            "classGroupName": snap.class_group_name,
            "statistics": stats
        }));
    }
    Ok(json!({
        "teacherId": teacher_id,
        "includeCancelled": options.include_cancelled,
        "courses": courses
    }))
}

fn reports_course_report_model(
    state: &AppState,
    conn: &Connection,
    params: &Value,
) -> HandlerResult {
    let (snap, stats) = course_statistics(state, conn, params)?;
    let model = report::course_report_model(&stats, header_for(&snap, &stats));
    Ok(json!(model))
}

fn reports_chart_model(state: &AppState, conn: &Connection, params: &Value) -> HandlerResult {
    let (_, stats) = course_statistics(state, conn, params)?;
    Ok(json!({
        "courseId": stats.course_id,
        "courseName": stats.course_name,
        "totalSessions": stats.total_sessions,
        "points": report::chart_series(&stats)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&AppState, &Connection, &Value) -> HandlerResult = match req.method.as_str()
    {
        "reports.courseStatistics" => reports_course_statistics,
        "reports.teacherStatistics" => reports_teacher_statistics,
        "reports.courseReportModel" => reports_course_report_model,
        "reports.chartModel" => reports_chart_model,
        _ => return None,
    };
    let state: &AppState = state;
    Some(respond(
        req,
        db_conn(state).and_then(|conn| handler(state, conn, &req.params)),
    ))
}
