// src/config.rs
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_WORKBOOK_FILE: &str = "payroll_workbook.json";
pub const DEFAULT_RAW_TABLE: &str = "payroll_raw";
pub const DEFAULT_EMPLOYEE_ENV_DIR: &str = "config/employees";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid environment configuration: {0}")]
    Env(#[from] envy::Error),
    #[error("Failed to read labels file {path}: {source}")]
    LabelsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Labels file {path} is not a JSON object of strings: {source}")]
    LabelsJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// --- Process Configuration ---

/// Process settings read from the environment (and `.env` if present).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_workbook_path")]
    pub workbook_path: PathBuf,
    /// JSON object mapping employee id to display label.
    pub labels_path: Option<PathBuf>,
    /// Holds `<emp>.env` rate files for `ingest --events`.
    #[serde(default = "default_employee_env_dir")]
    pub employee_env_dir: PathBuf,

    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    // TLS is enabled only when both are set
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,

    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_workbook_path() -> PathBuf {
    PathBuf::from(DEFAULT_WORKBOOK_FILE)
}

fn default_employee_env_dir() -> PathBuf {
    PathBuf::from(DEFAULT_EMPLOYEE_ENV_DIR)
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    3000
}

fn default_lock_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();
        Ok(envy::from_env::<Config>()?)
    }

    pub fn view_config(&self) -> Result<ViewConfig, ConfigError> {
        let labels = match &self.labels_path {
            Some(path) => load_labels(path)?,
            None => BTreeMap::new(),
        };
        Ok(ViewConfig {
            labels,
            ..ViewConfig::default()
        })
    }
}

// --- View Configuration ---

/// Immutable inputs of a refresh: the static label table and the ledger name.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewConfig {
    pub labels: BTreeMap<String, String>,
    pub raw_table: String,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            labels: BTreeMap::new(),
            raw_table: DEFAULT_RAW_TABLE.to_string(),
        }
    }
}

impl ViewConfig {
    pub fn with_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        }
    }
}

pub fn load_labels(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let json = fs::read_to_string(path).map_err(|source| ConfigError::LabelsIo {
        path: path.to_path_buf(),
        source,
    })?;
    let labels: BTreeMap<String, String> =
        serde_json::from_str(&json).map_err(|source| ConfigError::LabelsJson {
            path: path.to_path_buf(),
            source,
        })?;
    info!("Loaded {} employee labels from {}", labels.len(), path.display());
    Ok(labels)
}
