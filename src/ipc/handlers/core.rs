use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};
use crate::store::{FallbackStore, FallbackStrategy, SqliteStore};
use log::{info, warn};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let store = match SqliteStore::open(&path) {
        Ok(s) => s,
        Err(e) => {
            warn!(
                "event=workspace_select module=ipc status=error path={} error={:#}",
                path.display(),
                e
            );
            return err(&req.id, "db_open_failed", format!("{e:?}"), None);
        }
    };

    // Best-effort: a broken fallback setting must not keep the workspace closed.
    let strategy = match setup::load_fallback_strategy(store.conn(), &path) {
        Ok(s) => s,
        Err(e) => {
            warn!(
                "event=workspace_select module=ipc status=degraded reason=fallback_load error={:#}",
                e
            );
            FallbackStrategy::None
        }
    };
    let strategy_name = strategy.name();

    state.workspace = Some(path.clone());
    state.store = Some(FallbackStore::new(store, strategy));
    info!(
        "event=workspace_select module=ipc status=ok path={} fallback={}",
        path.display(),
        strategy_name
    );
    ok(
        &req.id,
        json!({
            "workspacePath": path.to_string_lossy(),
            "fallback": strategy_name
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
