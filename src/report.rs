use crate::calc::{self, AttendanceRate, CourseStatistics, StatusCounts};
use chrono::NaiveDateTime;
use serde::Serialize;

pub const GENERATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportHeader {
    pub course_name: String,
    pub class_group_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_name: Option<String>,
    pub generated_at: String,
    pub total_sessions: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub student_id: String,
    pub full_name: String,
    pub matricule: Option<String>,
    pub present_count: u32,
    pub attended_count: u32,
    pub total_sessions: u32,
    pub rate: AttendanceRate,
    pub rate_label: String,
}

/// Everything the printed course report is rendered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseReportModel {
    pub header: ReportHeader,
    pub rows: Vec<ReportRow>,
    pub totals: StatusCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub label: String,
    pub rate: AttendanceRate,
}

pub fn report_header(
    stats: &CourseStatistics,
    class_group_name: &str,
    teacher_name: Option<&str>,
    generated_at: NaiveDateTime,
) -> ReportHeader {
    ReportHeader {
        course_name: stats.course_name.clone(),
        class_group_name: class_group_name.to_string(),
        teacher_name: teacher_name.map(|s| s.to_string()),
        generated_at: generated_at.format(GENERATED_AT_FORMAT).to_string(),
        total_sessions: stats.total_sessions,
    }
}

pub fn report_rows(stats: &CourseStatistics) -> Vec<ReportRow> {
    calc::rank_for_report(&stats.students)
        .into_iter()
        .map(|s| ReportRow {
            present_count: s.counts.present,
            attended_count: s.counts.attended(),
            total_sessions: stats.total_sessions,
            rate: s.attendance_rate,
            rate_label: s.attendance_rate.label(),
            student_id: s.student_id,
            full_name: s.full_name,
            matricule: s.matricule,
        })
        .collect()
}

pub fn course_report_model(stats: &CourseStatistics, header: ReportHeader) -> CourseReportModel {
    CourseReportModel {
        header,
        rows: report_rows(stats),
        totals: stats.totals,
    }
}

/// Bar chart data, roster order.
pub fn chart_series(stats: &CourseStatistics) -> Vec<ChartPoint> {
    stats
        .students
        .iter()
        .map(|s| ChartPoint {
            label: s.full_name.clone(),
            rate: s.attendance_rate,
        })
        .collect()
}
