mod backup;
mod calc;
mod config;
mod db;
mod export;
mod ipc;
mod logging;
mod report;
mod snapshot;

use serde_json::json;
use std::io::{self, BufRead, Write};

fn main() {
    let (cfg, cfg_err) = match config::load_or_init() {
        Ok(cfg) => (cfg, None),
        Err(e) => (config::PresencedConfig::default(), Some(e)),
    };

    match logging::init_logging(&cfg.log_filter) {
        Ok(path) => tracing::debug!(log = %path.display(), "logging initialised"),
        Err(e) => {
            logging::init_stderr_logging(&cfg.log_filter);
            tracing::warn!("file logging unavailable: {e:#}");
        }
    }
    if let Some(e) = cfg_err {
        tracing::warn!("using default configuration: {e:#}");
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "presenced starting");

    let mut state = ipc::AppState::new(cfg.clone());
    if let Some(ws) = cfg.default_workspace.as_deref() {
        if let Err(e) = ipc::open_workspace(&mut state, ws) {
            tracing::error!(workspace = %ws.display(), "failed to open default workspace: {e:#}");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                tracing::warn!("bad request line: {e}");
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, exiting");
}
