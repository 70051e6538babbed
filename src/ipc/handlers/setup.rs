use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::plan::{CoursePlan, DATE_FORMAT};
use crate::store::{FallbackStrategy, Snapshot};
use anyhow::Context;
use chrono::NaiveDate;
use log::info;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::path::Path;

#[derive(Clone, Copy)]
enum SetupSection {
    CoursePlan,
    Fallback,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "coursePlan" => Some(Self::CoursePlan),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::CoursePlan => "setup.coursePlan",
            Self::Fallback => "setup.fallback",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::CoursePlan => {
            let plan = CoursePlan::default();
            json!({
                "workingDays": plan.working_days,
                "periodsPerDay": plan.periods_per_day,
                "termStart": null,
                "termEnd": null
            })
        }
        SetupSection::Fallback => json!({
            "strategy": "none",
            "fixturePath": null
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_nullable_string_max(v: &Value, key: &str, max_len: usize) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = parse_string_max(v, key, max_len)?;
    if s.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::String(s))
}

fn parse_nullable_date(v: &Value, key: &str) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = parse_string_max(v, key, 10)?;
    if s.is_empty() {
        return Ok(Value::Null);
    }
    NaiveDate::parse_from_str(&s, DATE_FORMAT)
        .map_err(|_| format!("{} must be YYYY-MM-DD", key))?;
    Ok(Value::String(s))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::CoursePlan => match k.as_str() {
                "workingDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 400)?));
                }
                "periodsPerDay" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 16)?));
                }
                "termStart" | "termEnd" => {
                    obj.insert(k.clone(), parse_nullable_date(v, k)?);
                }
                _ => return Err(format!("unknown coursePlan field: {}", k)),
            },
            SetupSection::Fallback => match k.as_str() {
                "strategy" => {
                    let s = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    let canonical = match s.as_str() {
                        "none" => "none",
                        "lastgood" | "last_good" => "lastGood",
                        "fixture" => "fixture",
                        _ => {
                            return Err("strategy must be one of: none, lastGood, fixture".into())
                        }
                    };
                    obj.insert(k.clone(), Value::String(canonical.to_string()));
                }
                "fixturePath" => {
                    obj.insert(k.clone(), parse_nullable_string_max(v, k, 1024)?);
                }
                _ => return Err(format!("unknown fallback field: {}", k)),
            },
        }
    }

    if let SetupSection::CoursePlan = section {
        let start = obj.get("termStart").and_then(|v| v.as_str());
        let end = obj.get("termEnd").and_then(|v| v.as_str());
        // Both are validated YYYY-MM-DD strings, so lexical order is date order.
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err("termStart must not be after termEnd".into());
            }
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed saved values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn load_course_plan(conn: &Connection) -> anyhow::Result<CoursePlan> {
    let value = load_section(conn, SetupSection::CoursePlan)?;
    serde_json::from_value(value).context("decode course plan")
}

fn strategy_from_section(value: &Value, workspace: &Path) -> anyhow::Result<FallbackStrategy> {
    match value.get("strategy").and_then(|v| v.as_str()) {
        Some("lastGood") => Ok(FallbackStrategy::LastGood),
        Some("fixture") => {
            let snapshot = match value.get("fixturePath").and_then(|v| v.as_str()) {
                Some(p) => {
                    let path = Path::new(p);
                    let path = if path.is_absolute() {
                        path.to_path_buf()
                    } else {
                        workspace.join(path)
                    };
                    Snapshot::from_json_file(&path)?
                }
                None => Snapshot::demo()?,
            };
            Ok(FallbackStrategy::Fixture(snapshot))
        }
        _ => Ok(FallbackStrategy::None),
    }
}

pub fn load_fallback_strategy(
    conn: &Connection,
    workspace: &Path,
) -> anyhow::Result<FallbackStrategy> {
    let value = load_section(conn, SetupSection::Fallback)?;
    strategy_from_section(&value, workspace)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let conn = store.inner().conn();
    let course_plan = match load_section(conn, SetupSection::CoursePlan) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let fallback = match load_section(conn, SetupSection::Fallback) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "coursePlan": course_plan,
            "fallback": fallback,
            "activeFallback": store.strategy().name()
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(store) = state.store.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let conn = store.inner().conn();
    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }

    // Resolve the strategy before saving so a bad fixture never gets persisted.
    let strategy = match section {
        SetupSection::Fallback => match strategy_from_section(&current, &workspace) {
            Ok(s) => Some(s),
            Err(e) => {
                return err(
                    &req.id,
                    "fixture_load_failed",
                    format!("{e:#}"),
                    Some(json!({ "fixturePath": current.get("fixturePath") })),
                )
            }
        },
        SetupSection::CoursePlan => None,
    };

    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(
        "event=setup_update module=ipc status=ok section={}",
        section_raw
    );
    if let Some(strategy) = strategy {
        store.set_strategy(strategy);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
