use crate::calc::{self, CalcError, StudentSummary, SubjectSummary, Tally};
use crate::ipc::error::{calc_err, err, ok, store_err};
use crate::ipc::helpers::{
    course_plan, date_param, optional_str, section_scope, store_ref, subject_id_param, Workspace,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceFilter, SectionScope, Student, StudentId, Subject};
use crate::store::RecordStore;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;

/// Subject summary plus the context the export needs to label it.
pub(super) struct SubjectReport {
    pub subject: Subject,
    pub date: Option<NaiveDate>,
    pub rows: Vec<SubjectSummary>,
}

/// Student summary plus the date it was restricted to, if any.
pub(super) struct StudentReport {
    pub summary: StudentSummary,
    pub date: Option<NaiveDate>,
}

/// Serializes `row` and attaches the band for `tally`.
fn banded<T: Serialize>(
    row: &T,
    tally: &Tally,
) -> Result<serde_json::Value, serde_json::Error> {
    let mut v = serde_json::to_value(row)?;
    if let Some(obj) = v.as_object_mut() {
        obj.insert("band".into(), json!(tally.band()));
    }
    Ok(v)
}

fn internal_err(req: &Request, e: serde_json::Error) -> serde_json::Value {
    err(&req.id, "internal_error", e.to_string(), None)
}

/// Roster scope from params, falling back to the given department/section.
fn scope_or(req: &Request, department: &str, section: &str) -> SectionScope {
    let requested = section_scope(req);
    if requested == SectionScope::default() {
        SectionScope::new(Some(department.to_string()), Some(section.to_string()))
    } else {
        requested
    }
}

pub(super) fn build_subject_report(
    store: &Workspace,
    req: &Request,
) -> Result<SubjectReport, serde_json::Value> {
    let plan = course_plan(store, req)?;
    let subject_id = subject_id_param(req)?;
    let date = date_param(&plan, req, "date")?;

    let subjects = store
        .list_subjects(&SectionScope::default())
        .map_err(|e| store_err(&req.id, e))?;
    let subject = subjects
        .into_iter()
        .find(|s| s.id == subject_id)
        .ok_or_else(|| {
            calc_err(
                &req.id,
                CalcError::not_found(format!("subject {} not found", subject_id)),
            )
        })?;

    let students = store
        .list_students(&scope_or(req, &subject.department, &subject.section))
        .map_err(|e| store_err(&req.id, e))?;
    let filter = AttendanceFilter {
        date,
        ..AttendanceFilter::for_subject(subject_id.clone())
    };
    let records = store
        .list_attendance(&filter)
        .map_err(|e| store_err(&req.id, e))?;

    let rows = calc::summarize_by_subject(&students, &records, &subject_id, date);
    Ok(SubjectReport {
        subject,
        date,
        rows,
    })
}

/// Resolves the target student from `studentId`, or else from a `query`
/// searched within the requested department/section.
fn resolve_student(store: &Workspace, req: &Request) -> Result<Student, serde_json::Value> {
    if let Some(id) = StudentId::from_param(req.params.get("studentId")) {
        let students = store
            .list_students(&SectionScope::default())
            .map_err(|e| store_err(&req.id, e))?;
        return students.into_iter().find(|s| s.id == id).ok_or_else(|| {
            calc_err(
                &req.id,
                CalcError::not_found(format!("student {} not found", id)),
            )
        });
    }

    let Some(query) = optional_str(req, "query") else {
        return Err(err(&req.id, "bad_params", "missing studentId or query", None));
    };
    let students = store
        .list_students(&section_scope(req))
        .map_err(|e| store_err(&req.id, e))?;
    calc::find_student(&students, &query).cloned().ok_or_else(|| {
        calc_err(
            &req.id,
            CalcError::not_found(format!("no student matches {:?}", query)),
        )
    })
}

pub(super) fn build_student_summary(
    store: &Workspace,
    req: &Request,
) -> Result<StudentReport, serde_json::Value> {
    let plan = course_plan(store, req)?;
    let date = date_param(&plan, req, "date")?;
    let student = resolve_student(store, req)?;
    let subjects = store
        .list_subjects(&scope_or(req, &student.department, &student.section))
        .map_err(|e| store_err(&req.id, e))?;
    let filter = AttendanceFilter {
        date,
        ..AttendanceFilter::for_student(student.id.clone())
    };
    let records = store
        .list_attendance(&filter)
        .map_err(|e| store_err(&req.id, e))?;
    Ok(StudentReport {
        summary: calc::summarize_by_student(&student, &subjects, &records),
        date,
    })
}

fn handle_summary_by_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let report = match build_subject_report(store, req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let rows = match report
        .rows
        .iter()
        .map(|r| banded(r, &r.tally))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(v) => v,
        Err(e) => return internal_err(req, e),
    };
    ok(
        &req.id,
        json!({
            "subject": report.subject,
            "date": report.date,
            "rows": rows
        }),
    )
}

fn handle_summary_by_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let StudentReport { summary, date } = match build_student_summary(store, req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let banded_totals = summary
        .subjects
        .iter()
        .map(|r| banded(r, &r.tally))
        .collect::<Result<Vec<_>, _>>()
        .and_then(|subjects| {
            let other = banded(&summary.other_subjects, &summary.other_subjects)?;
            let overall = banded(&summary.overall, &summary.overall)?;
            Ok((subjects, other, overall))
        });
    let (subjects, other_subjects, overall) = match banded_totals {
        Ok(v) => v,
        Err(e) => return internal_err(req, e),
    };
    ok(
        &req.id,
        json!({
            "student": summary.student,
            "date": date,
            "subjects": subjects,
            "otherSubjects": other_subjects,
            "overall": overall,
            "hasData": summary.overall.total > 0
        }),
    )
}

fn handle_summary_overall(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let plan = match course_plan(store, req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let student = match resolve_student(store, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let records = match store.list_attendance(&AttendanceFilter::for_student(student.id.clone())) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };

    let periods = calc::overall_by_period(&records, plan.total_periods());
    let days = calc::overall_by_day(&records, plan.working_days as usize);
    ok(
        &req.id,
        json!({
            "student": student,
            "coursePlan": plan,
            "periods": periods,
            "days": days,
            "bands": {
                "periods": calc::classify(periods.present_percent),
                "days": calc::classify(days.present_percent_day)
            }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "summary.bySubject" => Some(handle_summary_by_subject(state, req)),
        "summary.byStudent" => Some(handle_summary_by_student(state, req)),
        "summary.overall" => Some(handle_summary_overall(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banded_flattens_the_row_and_adds_the_band() {
        let row = SubjectSummary {
            student: Student {
                id: StudentId::new("1"),
                name: "Saravana".into(),
                reg_no: "CSE1001".into(),
                department: "CSE".into(),
                section: "A".into(),
                semester: 5,
            },
            tally: Tally {
                total: 4,
                present: 3,
                absent: 1,
                on_duty: 0,
                percentage: 75.0,
            },
        };
        let v = banded(&row, &row.tally).expect("serializable row");
        assert_eq!(v["student"]["regNo"], "CSE1001");
        assert_eq!(v["total"], 4);
        assert_eq!(v["band"], "good");

        let empty = banded(&Tally::default(), &Tally::default()).expect("serializable tally");
        assert_eq!(empty["percentage"], 0.0);
        assert_eq!(empty["band"], "critical");
    }

    #[test]
    fn banded_leaves_non_object_values_unbanded() {
        let v = banded(&"plain", &Tally::default()).expect("serializable string");
        assert_eq!(v, json!("plain"));
    }
}
