use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct HarvestPaths {
    pub harvest_home: PathBuf,
    pub state_dir: PathBuf,
    pub history_file: PathBuf,
    pub logs_dir: PathBuf,
}

impl HarvestPaths {
    pub fn under(root: &std::path::Path) -> Self {
        Self {
            harvest_home: root.to_path_buf(),
            state_dir: root.join("temp"),
            history_file: root.join("json").join("api.json"),
            logs_dir: root.join("logs"),
        }
    }

    pub fn cursor_file(&self) -> PathBuf {
        self.state_dir.join("poll_cursor.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join("harvest.lock")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir.join("audit.log")
    }
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<HarvestPaths> {
    let cwd = env::current_dir().context("current directory could not be resolved")?;
    let harvest_home = env_or_default_path("HARVEST_HOME", cwd);
    let defaults = HarvestPaths::under(&harvest_home);

    Ok(HarvestPaths {
        state_dir: env_or_default_path("HARVEST_STATE_DIR", defaults.state_dir),
        history_file: env_or_default_path("HARVEST_HISTORY_FILE", defaults.history_file),
        logs_dir: env_or_default_path("HARVEST_LOGS_DIR", defaults.logs_dir),
        harvest_home,
    })
}
