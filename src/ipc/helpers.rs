use crate::calc::CalcError;
use crate::ipc::error::{calc_err, err};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};
use crate::model::{SectionScope, StudentId, SubjectId};
use crate::plan::CoursePlan;
use crate::store::{FallbackStore, SqliteStore};
use chrono::NaiveDate;
use serde_json::json;

pub type Workspace = FallbackStore<SqliteStore>;

pub fn store_ref<'a>(state: &'a AppState, req: &Request) -> Result<&'a Workspace, serde_json::Value> {
    state
        .store
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn store_mut<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<&'a mut Workspace, serde_json::Value> {
    state
        .store
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn section_scope(req: &Request) -> SectionScope {
    SectionScope::new(optional_str(req, "department"), optional_str(req, "section"))
}

pub fn student_id_param(req: &Request) -> Result<StudentId, serde_json::Value> {
    StudentId::from_param(req.params.get("studentId"))
        .ok_or_else(|| err(&req.id, "bad_params", "missing studentId", None))
}

pub fn subject_id_param(req: &Request) -> Result<SubjectId, serde_json::Value> {
    SubjectId::from_param(req.params.get("subjectId"))
        .ok_or_else(|| err(&req.id, "bad_params", "missing subjectId", None))
}

pub fn course_plan(store: &Workspace, req: &Request) -> Result<CoursePlan, serde_json::Value> {
    setup::load_course_plan(store.inner().conn())
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

/// Parses and bounds-checks `params[key]` as a date. Absent or null is `None`.
pub fn date_param(
    plan: &CoursePlan,
    req: &Request,
    key: &str,
) -> Result<Option<NaiveDate>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let Some(raw) = v.as_str() else {
                return Err(calc_err(
                    &req.id,
                    CalcError::invalid_filter(
                        format!("{} must be a string", key),
                        json!({ "param": key, "value": v }),
                    ),
                ));
            };
            if raw.trim().is_empty() {
                return Ok(None);
            }
            plan.check_date(raw).map(Some).map_err(|e| calc_err(&req.id, e))
        }
    }
}

pub fn required_date(
    plan: &CoursePlan,
    req: &Request,
    key: &str,
) -> Result<NaiveDate, serde_json::Value> {
    date_param(plan, req, key)?
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Parses and bounds-checks `params.period`. Accepts integers and numeric strings.
pub fn period_param(plan: &CoursePlan, req: &Request) -> Result<Option<u32>, serde_json::Value> {
    let raw = match req.params.get("period") {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(v) => v,
    };
    let n = raw
        .as_i64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse::<i64>().ok()));
    let Some(n) = n else {
        return Err(calc_err(
            &req.id,
            CalcError::invalid_filter("period must be an integer", json!({ "period": raw })),
        ));
    };
    plan.check_period(n).map(Some).map_err(|e| calc_err(&req.id, e))
}

pub fn required_period(plan: &CoursePlan, req: &Request) -> Result<u32, serde_json::Value> {
    period_param(plan, req)?.ok_or_else(|| err(&req.id, "bad_params", "missing period", None))
}
