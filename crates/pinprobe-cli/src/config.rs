use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use pinprobe_registry::DEFAULT_INDEX_URL;
use pinprobe_sandbox::{default_python, DEFAULT_SANDBOX_DIR, DEFAULT_STEP_TIMEOUT};
use serde::Deserialize;

use crate::RunArgs;

pub(crate) const CONFIG_FILE_NAME: &str = "pinprobe.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ProjectConfig {
    pub(crate) index_url: Option<String>,
    pub(crate) python: Option<String>,
    pub(crate) venv_dir: Option<PathBuf>,
    pub(crate) step_timeout_secs: Option<u64>,
    pub(crate) include_prereleases: Option<bool>,
    pub(crate) log_dir: Option<PathBuf>,
    pub(crate) report_dir: Option<PathBuf>,
    pub(crate) backup_dir: Option<PathBuf>,
}

impl ProjectConfig {
    pub(crate) fn load(project: &Path) -> Result<Self> {
        let path = project.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunSettings {
    pub(crate) index_url: String,
    pub(crate) python: String,
    pub(crate) venv_dir: PathBuf,
    pub(crate) step_timeout: Option<Duration>,
    pub(crate) include_prereleases: bool,
    pub(crate) log_dir: PathBuf,
    pub(crate) report_dir: PathBuf,
    pub(crate) backup_dir: PathBuf,
}

impl RunSettings {
    pub(crate) fn resolve(project: &Path, config: &ProjectConfig, args: &RunArgs) -> Self {
        let project_path = |configured: &Option<PathBuf>, default: &str| {
            project.join(configured.as_deref().unwrap_or_else(|| Path::new(default)))
        };
        let step_timeout_secs = args
            .timeout
            .or(config.step_timeout_secs)
            .unwrap_or(DEFAULT_STEP_TIMEOUT.as_secs());

        Self {
            index_url: args
                .index_url
                .clone()
                .or_else(|| config.index_url.clone())
                .unwrap_or_else(|| DEFAULT_INDEX_URL.to_string()),
            python: args
                .python
                .clone()
                .or_else(|| config.python.clone())
                .unwrap_or_else(|| default_python().to_string()),
            venv_dir: project_path(&config.venv_dir, DEFAULT_SANDBOX_DIR),
            step_timeout: (step_timeout_secs > 0).then(|| Duration::from_secs(step_timeout_secs)),
            include_prereleases: args.include_prereleases
                || config.include_prereleases.unwrap_or(false),
            log_dir: project_path(&config.log_dir, "update_logs"),
            report_dir: project_path(&config.report_dir, "update_reports"),
            backup_dir: project_path(&config.backup_dir, "requirement_backups"),
        }
    }
}
