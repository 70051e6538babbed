use crate::calc::Tally;
use crate::ipc::error::ok;
use crate::ipc::helpers::store_ref;
use crate::ipc::types::{AppState, Request};
use crate::model::Student;
use serde_json::json;

use super::summary;

const OVERALL_SUBJECT_LABEL: &str = "OVERALL ALL SUBJECTS";
const OTHER_SUBJECTS_LABEL: &str = "OTHER SUBJECTS";

const SUBJECT_COLUMNS: [&str; 7] = [
    "Student Name",
    "Registration Number",
    "Total Periods",
    "Present",
    "Absent",
    "On Duty",
    "Attendance Percentage",
];

const STUDENT_COLUMNS: [&str; 8] = [
    "Student Name",
    "Registration Number",
    "Subject Name",
    "Total Periods",
    "Present",
    "Absent",
    "On Duty",
    "Attendance Percentage",
];

fn percent_cell(percentage: f64) -> String {
    format!("{:.2}%", percentage)
}

fn tally_cells(t: &Tally) -> [serde_json::Value; 5] {
    [
        json!(t.total),
        json!(t.present),
        json!(t.absent),
        json!(t.on_duty),
        json!(percent_cell(t.percentage)),
    ]
}

fn student_row(student: &Student, subject_name: Option<&str>, t: &Tally) -> Vec<serde_json::Value> {
    let mut row = vec![json!(student.name), json!(student.reg_no)];
    if let Some(name) = subject_name {
        row.push(json!(name));
    }
    row.extend(tally_cells(t));
    row
}

/// File names end up on disk; keep them to a conservative character set.
fn file_stem(raw: &str) -> String {
    let stem: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "student".to_string()
    } else {
        stem
    }
}

fn handle_reports_subject_summary_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let report = match summary::build_subject_report(store, req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let rows: Vec<Vec<serde_json::Value>> = report
        .rows
        .iter()
        .map(|r| student_row(&r.student, None, &r.tally))
        .collect();
    ok(
        &req.id,
        json!({
            "subject": report.subject,
            "date": report.date,
            "columns": SUBJECT_COLUMNS,
            "rows": rows,
            "suggestedFileName": "subject_summary.csv"
        }),
    )
}

fn handle_reports_student_summary_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let report = match summary::build_student_summary(store, req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let summary::StudentReport { summary, date } = report;

    let mut rows = Vec::with_capacity(summary.subjects.len() + 2);
    rows.push(student_row(
        &summary.student,
        Some(OVERALL_SUBJECT_LABEL),
        &summary.overall,
    ));
    for s in &summary.subjects {
        rows.push(student_row(&summary.student, Some(&s.subject.name), &s.tally));
    }
    // Keeps the subject rows summing to the overall row.
    if summary.other_subjects.total > 0 {
        rows.push(student_row(
            &summary.student,
            Some(OTHER_SUBJECTS_LABEL),
            &summary.other_subjects,
        ));
    }
    ok(
        &req.id,
        json!({
            "student": summary.student,
            "date": date,
            "columns": STUDENT_COLUMNS,
            "rows": rows,
            "suggestedFileName": format!("{}_complete_summary.csv", file_stem(&summary.student.name))
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.subjectSummaryModel" => Some(handle_reports_subject_summary_model(state, req)),
        "reports.studentSummaryModel" => Some(handle_reports_student_summary_model(state, req)),
        _ => None,
    }
}
