use crate::db;
use crate::ipc::access::{require_admin, resolve_actor};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{required_str, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    tracing::info!(workspace = %path.display(), "workspace selected");
    Ok(())
}

/// The actor is checked against the workspace being opened; the current one
/// stays selected when the check fails.
fn handle_workspace_select(state: &mut AppState, params: &Value) -> HandlerResult {
    let path = PathBuf::from(
        required_str(params, "path").map_err(|_| HandlerErr::bad_params("missing params.path"))?,
    );

    let conn = db::open_db(&path).map_err(|e| {
        tracing::error!(workspace = %path.display(), "failed to open workspace: {e:#}");
        HandlerErr::new("db_open_failed", format!("{e:#}"))
    })?;
    require_admin(resolve_actor(&conn, params)?.as_ref())?;

    state.workspace = Some(path.clone());
    state.db = Some(conn);
    tracing::info!(workspace = %path.display(), "workspace selected");
    Ok(json!({ "workspacePath": path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(respond(req, handle_workspace_select(state, &req.params))),
        _ => None,
    }
}
