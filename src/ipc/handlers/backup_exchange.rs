use crate::backup;
use crate::ipc::access::{require_admin, resolve_actor};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{db_conn, required_str, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::core::open_workspace;

fn bundle_failed(e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("bundle_failed", format!("{e:#}"))
}

/// Bundles carry every table, so only admins (or trusted callers) may move them.
fn require_workspace_admin(state: &AppState, params: &Value) -> Result<PathBuf, HandlerErr> {
    let conn = db_conn(state)?;
    require_admin(resolve_actor(conn, params)?.as_ref())?;
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn handle_export_bundle(state: &mut AppState, params: &Value) -> HandlerResult {
    let workspace = require_workspace_admin(state, params)?;
    let out_path = PathBuf::from(required_str(params, "outPath")?);
    let summary = backup::export_workspace_bundle(&workspace, &out_path).map_err(bundle_failed)?;
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256,
    }))
}

fn reopen_after_failed_import(state: &mut AppState, workspace: &Path, e: anyhow::Error) -> HandlerErr {
    tracing::error!(workspace = %workspace.display(), "imported database did not open: {e:#}");
    match backup::restore_previous_db(workspace).and_then(|_| open_workspace(state, workspace)) {
        Ok(()) => HandlerErr::new("db_open_failed", format!("{e:#}"))
            .with_details(json!({ "restoredPrevious": true })),
        Err(restore) => HandlerErr::new(
            "db_open_failed",
            format!("{e:#}; restoring the previous database failed: {restore:#}"),
        )
        .with_details(json!({ "restoredPrevious": false })),
    }
}

fn handle_import_bundle(state: &mut AppState, params: &Value) -> HandlerResult {
    let workspace = require_workspace_admin(state, params)?;
    let in_path = PathBuf::from(required_str(params, "inPath")?);

    // Release the connection before the database file is replaced.
    state.db = None;
    let summary = match backup::import_workspace_bundle(&in_path, &workspace) {
        Ok(summary) => summary,
        Err(e) => {
            // The workspace file was left untouched.
            open_workspace(state, &workspace)
                .map_err(|reopen| HandlerErr::new("db_open_failed", format!("{reopen:#}")))?;
            return Err(bundle_failed(e));
        }
    };
    if let Err(e) = open_workspace(state, &workspace) {
        state.db = None;
        return Err(reopen_after_failed_import(state, &workspace, e));
    }
    backup::discard_previous_db(&workspace);

    Ok(json!({
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": summary.bundle_format_detected,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "workspace.exportBundle" => handle_export_bundle(state, &req.params),
        "workspace.importBundle" => handle_import_bundle(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
