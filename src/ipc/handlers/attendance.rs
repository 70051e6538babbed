use crate::calc::{self, CalcError};
use crate::ipc::error::{calc_err, err, ok, store_err};
use crate::ipc::helpers::{
    course_plan, date_param, period_param, required_date, required_period, required_str,
    store_mut, store_ref, student_id_param, subject_id_param, Workspace,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{
    AttendanceFilter, AttendanceStatus, RecordKey, SectionScope, Student, StudentId, Subject,
    SubjectId,
};
use crate::store::RecordStore;
use crate::upsert::MarkOutcome;
use log::info;
use serde_json::json;
use std::collections::HashSet;

fn parse_status(req: &Request) -> Result<AttendanceStatus, serde_json::Value> {
    let raw = required_str(req, "status")?;
    AttendanceStatus::parse(&raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            format!("unknown status {:?}", raw),
            Some(json!({ "allowed": ["present", "absent", "onDuty"] })),
        )
    })
}

fn require_subject(
    store: &Workspace,
    req: &Request,
    id: &SubjectId,
) -> Result<Subject, serde_json::Value> {
    match store.inner().subject(id) {
        Ok(Some(s)) => Ok(s),
        Ok(None) => Err(calc_err(
            &req.id,
            CalcError::not_found(format!("subject {} not found", id)),
        )),
        Err(e) => Err(store_err(&req.id, e)),
    }
}

fn find_student(
    store: &Workspace,
    req: &Request,
    id: &StudentId,
) -> Result<Option<Student>, serde_json::Value> {
    store.inner().student(id).map_err(|e| store_err(&req.id, e))
}

/// A subject only takes marks from students of its own department and section.
fn in_subject_scope(student: &Student, subject: &Subject) -> bool {
    student.department == subject.department && student.section == subject.section
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let plan = match course_plan(store, req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let date = match date_param(&plan, req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = match period_param(&plan, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = AttendanceFilter {
        student_id: StudentId::from_param(req.params.get("studentId")),
        subject_id: SubjectId::from_param(req.params.get("subjectId")),
        date,
        period,
    };
    match store.list_attendance(&filter) {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let key = {
        let store = match store_ref(state, req) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let plan = match course_plan(store, req) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let student_id = match student_id_param(req) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let subject_id = match subject_id_param(req) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let date = match required_date(&plan, req, "date") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let period = match required_period(&plan, req) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let student = match find_student(store, req, &student_id) {
            Ok(Some(s)) => s,
            Ok(None) => {
                return calc_err(
                    &req.id,
                    CalcError::not_found(format!("student {} not found", student_id)),
                )
            }
            Err(e) => return e,
        };
        let subject = match require_subject(store, req, &subject_id) {
            Ok(s) => s,
            Err(e) => return e,
        };
        if !in_subject_scope(&student, &subject) {
            return calc_err(
                &req.id,
                CalcError::invalid_filter(
                    format!(
                        "student {} is not enrolled in {}/{}",
                        student_id, subject.department, subject.section
                    ),
                    json!({ "studentId": student_id, "subjectId": subject_id }),
                ),
            );
        }
        RecordKey {
            student_id,
            subject_id,
            date,
            period,
        }
    };
    let status = match parse_status(req) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let store = match store_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match store.upsert_attendance(&key, status) {
        Ok(outcome) => {
            info!(
                "event=attendance_mark module=ipc status=ok outcome={} student_id={} subject_id={} date={} period={}",
                outcome.kind(),
                key.student_id,
                key.subject_id,
                key.date,
                key.period
            );
            match serde_json::to_value(&outcome) {
                Ok(v) => ok(&req.id, v),
                Err(e) => err(&req.id, "internal_error", e.to_string(), None),
            }
        }
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_attendance_bulk_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (keys, skipped) = {
        let store = match store_ref(state, req) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let plan = match course_plan(store, req) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let subject_id = match subject_id_param(req) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let date = match required_date(&plan, req, "date") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let period = match required_period(&plan, req) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let subject = match require_subject(store, req, &subject_id) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let Some(raw_ids) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
            return err(&req.id, "bad_params", "studentIds must be an array", None);
        };

        let mut seen: HashSet<StudentId> = HashSet::new();
        let mut keys: Vec<RecordKey> = Vec::new();
        let mut skipped: Vec<serde_json::Value> = Vec::new();
        for raw in raw_ids {
            let Some(student_id) = StudentId::from_param(Some(raw)) else {
                skipped.push(raw.clone());
                continue;
            };
            if !seen.insert(student_id.clone()) {
                continue;
            }
            match find_student(store, req, &student_id) {
                Ok(Some(student)) if in_subject_scope(&student, &subject) => {
                    keys.push(RecordKey {
                        student_id,
                        subject_id: subject_id.clone(),
                        date,
                        period,
                    })
                }
                Ok(_) => skipped.push(json!(student_id)),
                Err(e) => return e,
            }
        }
        (keys, skipped)
    };
    let status = match parse_status(req) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let store = match store_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let outcomes = match store.mark_many(&keys, status) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };
    let count = |kind: &str| outcomes.iter().filter(|o| o.kind() == kind).count();
    let (created, updated, unchanged) = (count("created"), count("updated"), count("unchanged"));
    info!(
        "event=attendance_bulk_mark module=ipc status=ok created={} updated={} unchanged={} skipped={}",
        created,
        updated,
        unchanged,
        skipped.len()
    );
    let records: Vec<_> = outcomes.iter().map(MarkOutcome::record).collect();
    ok(
        &req.id,
        json!({
            "created": created,
            "updated": updated,
            "unchanged": unchanged,
            "skipped": skipped,
            "records": records
        }),
    )
}

fn handle_attendance_session_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let plan = match course_plan(store, req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let subject_id = match subject_id_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_date(&plan, req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = match required_period(&plan, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match require_subject(store, req, &subject_id) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let scope = SectionScope::new(Some(subject.department.clone()), Some(subject.section.clone()));
    let roster = match store.list_students(&scope) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };
    let filter = AttendanceFilter {
        subject_id: Some(subject_id),
        date: Some(date),
        period: Some(period),
        student_id: None,
    };
    let records = match store.list_attendance(&filter) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };
    let session = calc::tally(records.iter().filter(|r| roster.iter().any(|s| s.id == r.student_id)));
    ok(
        &req.id,
        json!({
            "tally": session,
            "totalMarked": session.total,
            "rosterSize": roster.len(),
            "unmarked": roster.len().saturating_sub(session.total)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.bulkMark" => Some(handle_attendance_bulk_mark(state, req)),
        "attendance.sessionStats" => Some(handle_attendance_session_stats(state, req)),
        _ => None,
    }
}
