use crate::calc::{AttendanceRecord, AttendanceStatus, CourseRef, SessionRef, StudentRef};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{Connection, OptionalExtension};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid stored value in {table}: {value}")]
    BadStoredValue { table: &'static str, value: String },
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotOptions {
    pub include_cancelled: bool,
}

/// One consistent read of everything a course report needs.
#[derive(Debug, Clone)]
pub struct CourseSnapshot {
    pub course: CourseRef,
    pub class_group_name: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub sessions: Vec<SessionRef>,
    pub students: Vec<StudentRef>,
    pub records: Vec<AttendanceRecord>,
}

impl CourseSnapshot {
    pub fn status_of(&self, student_id: &str, session_id: &str) -> Option<AttendanceStatus> {
        self.records
            .iter()
            .find(|r| r.student_id == student_id && r.session_id == session_id)
            .map(|r| r.status)
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let t = raw.trim();
    NaiveTime::parse_from_str(t, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M:%S"))
        .ok()
}

fn stored_date(raw: String) -> Result<NaiveDate, SnapshotError> {
    parse_date(&raw).ok_or(SnapshotError::BadStoredValue {
        table: "sessions",
        value: raw,
    })
}

fn stored_time(raw: Option<String>) -> Result<Option<NaiveTime>, SnapshotError> {
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_time(&s)
            .map(Some)
            .ok_or(SnapshotError::BadStoredValue {
                table: "sessions",
                value: s,
            }),
    }
}

type SessionRow = (String, String, Option<String>, Option<String>, i64);

pub fn load_course_snapshot(
    conn: &Connection,
    course_id: &str,
    options: SnapshotOptions,
) -> Result<CourseSnapshot, SnapshotError> {
    let tx = conn.unchecked_transaction()?;

    let course_row: Option<(String, String, String, String, String)> = tx
        .query_row(
            "SELECT c.name, c.class_group_id, g.name, c.teacher_id, t.full_name
             FROM courses c
             JOIN class_groups g ON g.id = c.class_group_id
             JOIN teachers t ON t.id = c.teacher_id
             WHERE c.id = ?",
            [course_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;
    let Some((course_name, class_group_id, class_group_name, teacher_id, teacher_name)) =
        course_row
    else {
        return Err(SnapshotError::NotFound("course"));
    };

    let session_rows: Vec<SessionRow> = {
        let mut stmt = tx.prepare(
            "SELECT id, date, start_time, end_time, cancelled
             FROM sessions
             WHERE course_id = ? AND (? OR cancelled = 0)
             ORDER BY date, COALESCE(start_time, ''), id",
        )?;
        let rows = stmt
            .query_map((course_id, options.include_cancelled), |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let mut sessions = Vec::with_capacity(session_rows.len());
    for (id, date, start, end, cancelled) in session_rows {
        sessions.push(SessionRef {
            id,
            course_id: course_id.to_string(),
            date: stored_date(date)?,
            start_time: stored_time(start)?,
            end_time: stored_time(end)?,
            cancelled: cancelled != 0,
        });
    }

    let students: Vec<StudentRef> = {
        let mut stmt = tx.prepare(
            "SELECT id, full_name, matricule
             FROM students
             WHERE class_group_id = ?
             ORDER BY full_name, id",
        )?;
        let rows = stmt
            .query_map([&class_group_id], |r| {
                Ok(StudentRef {
                    id: r.get(0)?,
                    full_name: r.get(1)?,
                    matricule: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let record_rows: Vec<(String, String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT a.student_id, a.session_id, a.status
             FROM attendance a
             JOIN sessions s ON s.id = a.session_id
             JOIN students st ON st.id = a.student_id
             WHERE s.course_id = ? AND (? OR s.cancelled = 0) AND st.class_group_id = ?",
        )?;
        let rows = stmt
            .query_map(
                (course_id, options.include_cancelled, &class_group_id),
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let mut records = Vec::with_capacity(record_rows.len());
    for (student_id, session_id, status) in record_rows {
        let Some(status) = AttendanceStatus::parse(&status) else {
            return Err(SnapshotError::BadStoredValue {
                table: "attendance",
                value: status,
            });
        };
        records.push(AttendanceRecord {
            student_id,
            session_id,
            status,
        });
    }

    tx.commit()?;

    Ok(CourseSnapshot {
        course: CourseRef {
            id: course_id.to_string(),
            name: course_name,
            class_group_id,
        },
        class_group_name,
        teacher_id,
        teacher_name,
        sessions,
        students,
        records,
    })
}

pub fn teacher_course_ids(conn: &Connection, teacher_id: &str) -> Result<Vec<String>, SnapshotError> {
    let exists = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        return Err(SnapshotError::NotFound("teacher"));
    }
    let mut stmt = conn.prepare("SELECT id FROM courses WHERE teacher_id = ? ORDER BY name, id")?;
    let ids = stmt
        .query_map([teacher_id], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}
