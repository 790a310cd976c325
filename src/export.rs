use crate::calc::{AttendanceStatus, CourseStatistics};
use crate::report::{CourseReportModel, ReportHeader, ReportRow};
use crate::snapshot::{CourseSnapshot, DATE_FORMAT};
use anyhow::{anyhow, Context, Result};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub const ATTENDANCE_SHEET: &str = "Attendance";
pub const STATISTICS_SHEET: &str = "Statistics";
const STATS_TABLE_FIRST_ROW: usize = 7;

#[derive(Debug, Clone)]
pub struct WorkbookSummary {
    pub sheet_count: usize,
    pub student_rows: usize,
    pub session_columns: usize,
}

/// 1-based column index to spreadsheet letters (1 -> A, 27 -> AA).
pub fn column_letter(mut idx: usize) -> String {
    let mut out = Vec::new();
    while idx > 0 {
        let rem = (idx - 1) % 26;
        out.push(b'A' + rem as u8);
        idx = (idx - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn cell(col: usize, row: usize) -> String {
    format!("{}{}", column_letter(col), row)
}

pub fn write_course_workbook(
    path: &Path,
    snapshot: &CourseSnapshot,
    stats: &CourseStatistics,
    header: &ReportHeader,
) -> Result<WorkbookSummary> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let mut book = umya_spreadsheet::new_file();
    {
        let sheet = book
            .get_sheet_by_name_mut("Sheet1")
            .ok_or_else(|| anyhow!("new workbook has no default sheet"))?;
        sheet.set_name(ATTENDANCE_SHEET);

        sheet.get_cell_mut("A1").set_value("Student");
        for (i, session) in snapshot.sessions.iter().enumerate() {
            sheet
                .get_cell_mut(cell(i + 2, 1).as_str())
                .set_value(session.date.format(DATE_FORMAT).to_string());
        }
        for (r, student) in snapshot.students.iter().enumerate() {
            let row = r + 2;
            sheet
                .get_cell_mut(cell(1, row).as_str())
                .set_value_string(student.full_name.as_str());
            for (i, session) in snapshot.sessions.iter().enumerate() {
                let value = snapshot
                    .status_of(&student.id, &session.id)
                    .map(AttendanceStatus::as_str)
                    .unwrap_or("-");
                sheet.get_cell_mut(cell(i + 2, row).as_str()).set_value(value);
            }
        }
    }

    book.new_sheet(STATISTICS_SHEET)
        .map_err(|e| anyhow!("failed to create sheet: {}", e))?;
    let sheet = book
        .get_sheet_by_name_mut(STATISTICS_SHEET)
        .ok_or_else(|| anyhow!("statistics sheet missing after creation"))?;

    let header_block = [
        ("Course", header.course_name.clone()),
        ("Class group", header.class_group_name.clone()),
        ("Generated at", header.generated_at.clone()),
        ("Total sessions", header.total_sessions.to_string()),
    ];
    for (i, (label, value)) in header_block.iter().enumerate() {
        sheet.get_cell_mut(cell(1, i + 1).as_str()).set_value(*label);
        sheet
            .get_cell_mut(cell(2, i + 1).as_str())
            .set_value_string(value.as_str());
    }

    let columns = [
        "ID",
        "Full name",
        "Matricule",
        "Present",
        "Late",
        "Absent",
        "Excused",
        "Sessions",
        "Rate (%)",
    ];
    let table_header_row = STATS_TABLE_FIRST_ROW - 1;
    for (i, title) in columns.iter().enumerate() {
        sheet
            .get_cell_mut(cell(i + 1, table_header_row).as_str())
            .set_value(*title);
    }
    for (r, s) in stats.students.iter().enumerate() {
        let row = STATS_TABLE_FIRST_ROW + r;
        // Text columns stay text so matricules like "007" keep their zeros.
        let text = [
            (1, s.student_id.clone()),
            (2, s.full_name.clone()),
            (3, s.matricule.clone().unwrap_or_else(|| "-".to_string())),
            (9, s.attendance_rate.to_string()),
        ];
        for (col, v) in text {
            sheet.get_cell_mut(cell(col, row).as_str()).set_value_string(v);
        }
        let counts = [
            (4, s.counts.present),
            (5, s.counts.late),
            (6, s.counts.absent),
            (7, s.counts.excused),
            (8, stats.total_sessions),
        ];
        for (col, n) in counts {
            sheet.get_cell_mut(cell(col, row).as_str()).set_value_number(n);
        }
    }

    umya_spreadsheet::writer::xlsx::write(&book, path).context("write spreadsheet failed")?;
    tracing::info!(path = %path.display(), course = %stats.course_id, "course workbook written");

    Ok(WorkbookSummary {
        sheet_count: 2,
        student_rows: snapshot.students.len(),
        session_columns: snapshot.sessions.len(),
    })
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn render_report_csv(header: &ReportHeader, rows: &[ReportRow]) -> String {
    let mut csv = String::from(
        "course,class_group,student_id,full_name,matricule,present,attended,total_sessions,rate\n",
    );
    for r in rows {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            csv_quote(&header.course_name),
            csv_quote(&header.class_group_name),
            csv_quote(&r.student_id),
            csv_quote(&r.full_name),
            csv_quote(r.matricule.as_deref().unwrap_or("")),
            r.present_count,
            r.attended_count,
            r.total_sessions,
            r.rate
        ));
    }
    csv
}

pub fn write_report_csv(path: &Path, header: &ReportHeader, rows: &[ReportRow]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, render_report_csv(header, rows))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(rows.len())
}

// Landscape A4, millimetres.
const PDF_PAGE_WIDTH: f32 = 297.0;
const PDF_PAGE_HEIGHT: f32 = 210.0;
const PDF_MARGIN: f32 = 12.0;
const PDF_LINE: f32 = 6.0;
const PDF_FONT_SIZE: f32 = 9.0;
const PDF_NAME_MAX_CHARS: usize = 45;
const PDF_COLUMNS: [(&str, f32); 5] = [
    ("ID", 12.0),
    ("Full name", 80.0),
    ("Matricule", 165.0),
    ("Attended", 210.0),
    ("Rate", 245.0),
];

#[derive(Debug, Clone)]
pub struct PdfSummary {
    pub pages: usize,
    pub rows: usize,
}

pub fn pdf_header_lines(header: &ReportHeader) -> Vec<String> {
    let mut lines = vec![
        format!("Class group: {}", header.class_group_name),
        format!("Generated: {}", header.generated_at),
        format!("Sessions: {}", header.total_sessions),
    ];
    if let Some(teacher) = &header.teacher_name {
        lines.insert(1, format!("Teacher: {}", teacher));
    }
    lines
}

/// One printed table row: id, name, matricule or `-`, attended/total, rate.
pub fn pdf_row_cells(row: &ReportRow) -> [String; 5] {
    let name = if row.full_name.chars().count() > PDF_NAME_MAX_CHARS {
        let cut: String = row.full_name.chars().take(PDF_NAME_MAX_CHARS - 3).collect();
        format!("{}...", cut)
    } else {
        row.full_name.clone()
    };
    [
        row.student_id.clone(),
        name,
        row.matricule.clone().unwrap_or_else(|| "-".to_string()),
        format!("{}/{}", row.attended_count, row.total_sessions),
        row.rate_label.clone(),
    ]
}

struct PdfCursor {
    layer: PdfLayerReference,
    y: f32,
}

impl PdfCursor {
    fn text(&self, text: &str, size: f32, x: f32, font: &IndirectFontRef) {
        self.layer.use_text(text, size, Mm(x), Mm(self.y), font);
    }
}

fn pdf_table_header(cursor: &mut PdfCursor, bold: &IndirectFontRef) {
    for (title, x) in PDF_COLUMNS {
        cursor.text(title, PDF_FONT_SIZE, x, bold);
    }
    cursor.y -= PDF_LINE;
}

pub fn write_report_pdf(path: &Path, model: &CourseReportModel) -> Result<PdfSummary> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let title = format!("Attendance report: {}", model.header.course_name);
    let (doc, page, layer) = PdfDocument::new(
        title.as_str(),
        Mm(PDF_PAGE_WIDTH),
        Mm(PDF_PAGE_HEIGHT),
        "report",
    );
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| anyhow!("failed to load pdf font: {e}"))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| anyhow!("failed to load pdf font: {e}"))?;

    let mut cursor = PdfCursor {
        layer: doc.get_page(page).get_layer(layer),
        y: PDF_PAGE_HEIGHT - PDF_MARGIN - 4.0,
    };
    cursor.text(&title, 14.0, PDF_MARGIN, &bold);
    cursor.y -= PDF_LINE * 1.5;
    for line in pdf_header_lines(&model.header) {
        cursor.text(&line, 10.0, PDF_MARGIN, &regular);
        cursor.y -= PDF_LINE;
    }
    cursor.y -= PDF_LINE / 2.0;
    pdf_table_header(&mut cursor, &bold);

    let mut pages = 1;
    for row in &model.rows {
        if cursor.y < PDF_MARGIN {
            let (page, layer) = doc.add_page(Mm(PDF_PAGE_WIDTH), Mm(PDF_PAGE_HEIGHT), "report");
            pages += 1;
            cursor = PdfCursor {
                layer: doc.get_page(page).get_layer(layer),
                y: PDF_PAGE_HEIGHT - PDF_MARGIN - 4.0,
            };
            pdf_table_header(&mut cursor, &bold);
        }
        for ((_, x), value) in PDF_COLUMNS.iter().zip(pdf_row_cells(row)) {
            cursor.text(&value, PDF_FONT_SIZE, *x, &regular);
        }
        cursor.y -= PDF_LINE;
    }

    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    doc.save(&mut BufWriter::new(file))
        .map_err(|e| anyhow!("failed to write {}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), pages, rows = model.rows.len(), "pdf report written");

    Ok(PdfSummary {
        pages,
        rows: model.rows.len(),
    })
}
