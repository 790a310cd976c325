use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::calc::AttendanceStatus;

/// Daemon configuration loaded from `~/.config/presenced/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresencedConfig {
    /// Tracing filter directive; `RUST_LOG` wins when set.
    pub log_filter: String,
    /// Workspace opened at startup, before any `workspace.select`.
    pub default_workspace: Option<PathBuf>,
    /// Count cancelled sessions in reports unless a request says otherwise.
    pub include_cancelled: bool,
    /// Status written for students left out of a roll call.
    pub default_status: String,
}

impl Default for PresencedConfig {
    fn default() -> Self {
        Self {
            log_filter: "info,presenced=debug".to_string(),
            default_workspace: None,
            include_cancelled: false,
            default_status: "absent".to_string(),
        }
    }
}

impl PresencedConfig {
    pub fn default_status(&self) -> Result<AttendanceStatus> {
        AttendanceStatus::parse(&self.default_status)
            .ok_or_else(|| anyhow!("invalid default_status: {}", self.default_status))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("presenced")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<PresencedConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = PresencedConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: PresencedConfig = toml::from_str(&data)?;
    cfg.default_status()?;
    Ok(cfg)
}
