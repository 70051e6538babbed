use crate::calc::{self, CalcError};
use crate::ipc::error::{calc_err, err, ok, store_err};
use crate::ipc::helpers::{required_str, section_scope, store_ref};
use crate::ipc::types::{AppState, Request};
use crate::store::{NewStudent, NewSubject, RecordStore};
use serde_json::json;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    match store.list_students(&section_scope(req)) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let new: NewStudent = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    for (key, value) in [
        ("name", &new.name),
        ("regNo", &new.reg_no),
        ("department", &new.department),
        ("section", &new.section),
    ] {
        if value.trim().is_empty() {
            return err(&req.id, "bad_params", format!("{} must not be empty", key), None);
        }
    }

    match store.inner().enroll_student(&new) {
        Ok(student) => ok(
            &req.id,
            json!({ "studentId": student.id, "student": student }),
        ),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            format!("{e:#}"),
            Some(json!({ "table": "students", "regNo": new.reg_no.trim() })),
        ),
    }
}

fn handle_students_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let query = match required_str(req, "query") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let students = match store.list_students(&section_scope(req)) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };
    match calc::find_student(&students, &query) {
        Some(student) => ok(&req.id, json!({ "student": student })),
        None => calc_err(
            &req.id,
            CalcError::not_found(format!("no student matches {:?}", query)),
        ),
    }
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };
    match store.list_subjects(&section_scope(req)) {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let new: NewSubject = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    if new.name.trim().is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    match store.inner().add_subject(&new) {
        Ok(subject) => ok(
            &req.id,
            json!({ "subjectId": subject.id, "subject": subject }),
        ),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            format!("{e:#}"),
            Some(json!({ "table": "subjects" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.search" => Some(handle_students_search(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        _ => None,
    }
}
