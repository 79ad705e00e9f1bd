//! TOML configuration for the `queue-worker` binary, covering every option the spec's
//! external-interfaces section enumerates.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, #[source] source: toml::de::Error },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerSection,
    pub store: StoreSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub folder: FolderSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    /// Overrides the hostname-derived default identity.
    pub identifier: Option<String>,
    #[serde(default = "default_avg_stats_secs")]
    pub avg_stats_secs: u64,
    #[serde(default = "default_max_cpu")]
    pub max_cpu: f64,
    #[serde(default = "default_min_free_ram")]
    pub min_free_ram: f64,
    #[serde(default)]
    pub execution_plan: ExecutionPlanSection,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            identifier: None,
            avg_stats_secs: default_avg_stats_secs(),
            max_cpu: default_max_cpu(),
            min_free_ram: default_min_free_ram(),
            execution_plan: ExecutionPlanSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionPlanSection {
    #[serde(default = "default_work_jobs_interval")]
    pub work_jobs: u64,
    #[serde(default = "default_remove_jobs_interval")]
    pub remove_jobs: u64,
    #[serde(default = "default_flag_jobs_interval")]
    pub flag_jobs: u64,
    #[serde(default = "default_collect_stats_interval")]
    pub collect_stats: u64,
}

impl Default for ExecutionPlanSection {
    fn default() -> Self {
        Self {
            work_jobs: default_work_jobs_interval(),
            remove_jobs: default_remove_jobs_interval(),
            flag_jobs: default_flag_jobs_interval(),
            collect_stats: default_collect_stats_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    pub mongo_uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { filter: default_log_filter() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FolderSection {
    /// Per-project virtual environment root. Out of scope for the core; consulted only by the
    /// process launcher when resolving an executable.
    pub home: Option<PathBuf>,
}

fn default_avg_stats_secs() -> u64 {
    60
}

fn default_max_cpu() -> f64 {
    90.0
}

fn default_min_free_ram() -> f64 {
    256.0
}

fn default_work_jobs_interval() -> u64 {
    1
}

fn default_remove_jobs_interval() -> u64 {
    10
}

fn default_flag_jobs_interval() -> u64 {
    10
}

fn default_collect_stats_interval() -> u64 {
    5
}

fn default_log_filter() -> String {
    "info".to_string()
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}
