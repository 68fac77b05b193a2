use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::Token;
use crate::error::PipewatchError;

/// Configuration file structure for pipewatch.
///
/// Holds the GitLab connection settings and the polling cadence. The GitLab
/// section is re-read for every operation, so edits take effect on the next poll.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub gitlab: GitLabConfig,

    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitLabConfig {
    /// GitLab instance base URL (e.g. `https://gitlab.example.com`)
    pub base_url: Option<String>,

    /// GitLab personal access token, sent as `PRIVATE-TOKEN`
    pub personal_access_token: Option<Token>,

    /// Numeric project ID. Detected from the workspace git remote when absent.
    pub project_id: Option<u64>,

    /// Directory whose `.git/config` is used for project detection
    pub workspace: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PollingConfig {
    #[serde(default = "default_pipeline_interval_ms")]
    pub pipeline_interval_ms: u64,

    #[serde(default = "default_job_interval_ms")]
    pub job_interval_ms: u64,

    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Values supplied on the command line or through the environment.
/// They win over whatever the config file says.
#[derive(Debug, Clone, Default)]
pub struct GitLabOverrides {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub project_id: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            pipeline_interval_ms: default_pipeline_interval_ms(),
            job_interval_ms: default_job_interval_ms(),
            log_interval_ms: default_log_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_pipeline_interval_ms() -> u64 {
    10_000
}

fn default_job_interval_ms() -> u64 {
    5_000
}

fn default_log_interval_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl PollingConfig {
    pub fn pipeline_interval(&self) -> Duration {
        Duration::from_millis(self.pipeline_interval_ms.max(1))
    }

    pub fn job_interval(&self) -> Duration {
        Duration::from_millis(self.job_interval_ms.max(1))
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

impl GitLabConfig {
    pub fn apply(&mut self, overrides: &GitLabOverrides) {
        if let Some(url) = &overrides.base_url {
            self.base_url = Some(url.clone());
        }
        if let Some(token) = &overrides.token {
            self.personal_access_token = Some(Token::from(token.as_str()));
        }
        if let Some(id) = overrides.project_id {
            self.project_id = Some(id);
        }
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

const CANDIDATES: [&str; 4] = [
    "pipewatch.toml",
    "pipewatch.json",
    "pipewatch.yaml",
    "pipewatch.yml",
];

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./pipewatch.toml, ./pipewatch.json, ./pipewatch.yaml, ./pipewatch.yml
    /// 3. `<config dir>/pipewatch/config.toml`
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        if let Some(config) = Self::load_from_dir(Path::new("."))? {
            return Ok(config);
        }

        if let Some(user_config) = dirs::config_dir().map(|d| d.join("pipewatch").join("config.toml")) {
            if user_config.exists() {
                return Self::load_from_path(&user_config);
            }
        }

        Ok(Self::default())
    }

    fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        for candidate in &CANDIDATES {
            let path = dir.join(candidate);
            if path.exists() {
                return Self::load_from_path(&path).map(Some);
            }
        }
        Ok(None)
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }
}

/// Where the monitor reads its GitLab settings from.
///
/// Called once per operation; implementations must not cache beyond that.
pub trait ConfigSource: Send + Sync {
    fn gitlab(&self) -> crate::error::Result<GitLabConfig>;
}

/// Re-reads the config file on every call and layers CLI/env overrides on top.
pub struct ConfigFile {
    path: Option<PathBuf>,
    overrides: GitLabOverrides,
}

impl ConfigFile {
    pub fn new(path: Option<PathBuf>, overrides: GitLabOverrides) -> Self {
        Self { path, overrides }
    }
}

impl ConfigSource for ConfigFile {
    fn gitlab(&self) -> crate::error::Result<GitLabConfig> {
        let config = Config::load(self.path.as_deref())
            .map_err(|e| PipewatchError::Config(format!("{e:#}")))?;
        let mut gitlab = config.gitlab;
        gitlab.apply(&self.overrides);
        Ok(gitlab)
    }
}

impl ConfigSource for GitLabConfig {
    fn gitlab(&self) -> crate::error::Result<GitLabConfig> {
        Ok(self.clone())
    }
}
