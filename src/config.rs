use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

pub const GRADING_SETTINGS_KEY: &str = "settings.grading";

/// Process-level options, read once at start-up.
#[derive(Debug, Clone, Default)]
pub struct DaemonConfig {
    pub log_filter: Option<String>,
    pub workspace: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self {
            log_filter: non_empty_var("REPORTCARDD_LOG"),
            workspace: non_empty_var("REPORTCARDD_WORKSPACE").map(PathBuf::from),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Per-workspace grading scale. Scores live in `[0, scale_max]`; a ranked
/// student at or above `pass_mark` counts towards the success rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingSettings {
    pub scale_max: f64,
    pub pass_mark: f64,
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            scale_max: 20.0,
            pass_mark: 10.0,
        }
    }
}

impl GradingSettings {
    /// Applies a partial update. Unknown keys and out-of-range values are
    /// rejected without touching `self`.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        let mut next = *self;
        for (k, v) in patch {
            let n = v
                .as_f64()
                .filter(|n| n.is_finite())
                .ok_or_else(|| format!("{} must be a number", k))?;
            match k.as_str() {
                "scaleMax" => next.scale_max = n,
                "passMark" => next.pass_mark = n,
                _ => return Err(format!("unknown grading field: {}", k)),
            }
        }
        if next.scale_max <= 0.0 {
            return Err("scaleMax must be positive".to_string());
        }
        if next.pass_mark < 0.0 || next.pass_mark > next.scale_max {
            return Err("passMark must be within [0, scaleMax]".to_string());
        }
        *self = next;
        Ok(())
    }

    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let mut current = Self::default();
        if let Some(saved) = db::settings_get_json(conn, GRADING_SETTINGS_KEY)? {
            if let Some(obj) = saved.as_object() {
                // A malformed stored value falls back to defaults.
                let _ = current.merge_patch(obj);
            }
        }
        Ok(current)
    }

    pub fn save(&self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(conn, GRADING_SETTINGS_KEY, &serde_json::to_value(self)?)
    }
}
