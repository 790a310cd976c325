use chrono::{NaiveDate, NaiveTime};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Excused,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 4] = [
        AttendanceStatus::Present,
        AttendanceStatus::Late,
        AttendanceStatus::Absent,
        AttendanceStatus::Excused,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Excused => "excused",
        }
    }

    /// Accepts the stored codes plus the legacy roll-call codes
    /// (`retard`, `motif`) still found in older exports.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "late" | "retard" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            "excused" | "motif" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }

    pub fn counts_as_attended(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRef {
    pub id: String,
    pub name: String,
    pub class_group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub id: String,
    pub course_id: String,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRef {
    pub id: String,
    pub full_name: String,
    pub matricule: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub session_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub present: u32,
    pub late: u32,
    pub absent: u32,
    pub excused: u32,
}

impl StatusCounts {
    pub fn add(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Late => self.late += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Excused => self.excused += 1,
        }
    }

    pub fn merge(&mut self, other: &StatusCounts) {
        self.present += other.present;
        self.late += other.late;
        self.absent += other.absent;
        self.excused += other.excused;
    }

    pub fn get(&self, status: AttendanceStatus) -> u32 {
        match status {
            AttendanceStatus::Present => self.present,
            AttendanceStatus::Late => self.late,
            AttendanceStatus::Absent => self.absent,
            AttendanceStatus::Excused => self.excused,
        }
    }

    pub fn attended(&self) -> u32 {
        AttendanceStatus::ALL
            .iter()
            .filter(|s| s.counts_as_attended())
            .map(|s| self.get(*s))
            .sum()
    }

    pub fn recorded(&self) -> u32 {
        self.present + self.late + self.absent + self.excused
    }
}

/// Percentage held as hundredths of a percent, so `33.33 %` is `3333`.
///
/// Exports print this value as-is; nothing downstream recomputes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttendanceRate(u32);

impl AttendanceRate {
    pub const ZERO: AttendanceRate = AttendanceRate(0);

    pub fn hundredths(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.hundredths()) / 100.0
    }

    pub fn label(self) -> String {
        format!("{}%", self)
    }
}

impl fmt::Display for AttendanceRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for AttendanceRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

/// `attended / total * 100` rounded to 2 decimals, half away from zero.
///
/// Computed on integers so that exact halves (e.g. 1/32 = 3.125 %) round
/// the same way on every platform. Zero sessions yield a zero rate.
pub fn attendance_rate(attended: u32, total_sessions: u32) -> AttendanceRate {
    if total_sessions == 0 {
        return AttendanceRate::ZERO;
    }
    let numerator = u64::from(attended) * 10_000;
    let denom = u64::from(total_sessions);
    let mut hundredths = numerator / denom;
    if (numerator % denom) * 2 >= denom {
        hundredths += 1;
    }
    AttendanceRate(u32::try_from(hundredths).unwrap_or(u32::MAX))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStatistics {
    pub student_id: String,
    pub full_name: String,
    pub matricule: Option<String>,
    pub counts: StatusCounts,
    pub recorded_sessions: u32,
    pub has_records: bool,
    pub attendance_rate: AttendanceRate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStatistics {
    pub course_id: String,
    pub course_name: String,
    pub total_sessions: u32,
    pub students: Vec<StudentStatistics>,
    pub totals: StatusCounts,
}

pub fn compute_course_statistics(
    course: &CourseRef,
    sessions: &[SessionRef],
    students: &[StudentRef],
    records: &[AttendanceRecord],
) -> CourseStatistics {
    let session_ids: HashSet<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
    let total_sessions = u32::try_from(session_ids.len()).unwrap_or(u32::MAX);

    let mut by_student: HashMap<&str, StatusCounts> = HashMap::new();
    for r in records {
        if !session_ids.contains(r.session_id.as_str()) {
            continue;
        }
        by_student
            .entry(r.student_id.as_str())
            .or_default()
            .add(r.status);
    }

    let mut totals = StatusCounts::default();
    let per_student: Vec<StudentStatistics> = students
        .iter()
        .map(|s| {
            let counts = by_student
                .get(s.id.as_str())
                .copied()
                .unwrap_or_default();
            totals.merge(&counts);
            StudentStatistics {
                student_id: s.id.clone(),
                full_name: s.full_name.clone(),
                matricule: s.matricule.clone(),
                counts,
                recorded_sessions: counts.recorded(),
                has_records: counts.recorded() > 0,
                attendance_rate: attendance_rate(counts.attended(), total_sessions),
            }
        })
        .collect();

    CourseStatistics {
        course_id: course.id.clone(),
        course_name: course.name.clone(),
        total_sessions,
        students: per_student,
        totals,
    }
}

fn report_order(a: &StudentStatistics, b: &StudentStatistics) -> Ordering {
    b.attendance_rate
        .cmp(&a.attendance_rate)
        .then_with(|| a.full_name.cmp(&b.full_name))
        .then_with(|| a.student_id.cmp(&b.student_id))
}

/// Rate descending, then full name, then student id.
pub fn rank_for_report(students: &[StudentStatistics]) -> Vec<StudentStatistics> {
    let mut ranked = students.to_vec();
    ranked.sort_by(report_order);
    ranked
}
