use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ClampPolicy;

/// Application-level constants
pub const APP_NAME: &str = "FieldScan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_TESSDATA_DIR: &str = "/usr/share/tesseract-ocr/5/tessdata";
pub const DEFAULT_LANGUAGES: &str = "eng";
pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 120;

const DATABASE_FILE: &str = "fieldscan.db";

/// Filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,fieldscan=debug"
}

/// Get the application data directory
/// ~/FieldScan/, or ./FieldScan when no home directory is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Runtime configuration for the scan service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub data_dir: PathBuf,
    /// Overrides `<data_dir>/fieldscan.db`.
    pub database_path: Option<PathBuf>,
    /// Write crops here as `<image>/<field>.png` instead of beside the source.
    pub crop_dir: Option<PathBuf>,
    pub tessdata_dir: PathBuf,
    pub languages: String,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub job_timeout_secs: u64,
    pub clamp_policy: ClampPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            data_dir: app_data_dir(),
            database_path: None,
            crop_dir: None,
            tessdata_dir: PathBuf::from(DEFAULT_TESSDATA_DIR),
            languages: DEFAULT_LANGUAGES.to_string(),
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            clamp_policy: ClampPolicy::default(),
        }
    }
}

impl ScanConfig {
    /// Defaults overridden by `FIELDSCAN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("FIELDSCAN_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("FIELDSCAN_DATABASE") {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup("FIELDSCAN_CROP_DIR") {
            config.crop_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup("FIELDSCAN_TESSDATA").or_else(|| lookup("TESSDATA_PREFIX")) {
            config.tessdata_dir = PathBuf::from(dir);
        }
        if let Some(langs) = lookup("FIELDSCAN_LANGUAGES") {
            config.languages = langs;
        }
        if let Some(raw) = lookup("FIELDSCAN_WORKERS") {
            config.worker_count = parse_positive("FIELDSCAN_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("FIELDSCAN_QUEUE_CAPACITY") {
            config.queue_capacity = parse_positive("FIELDSCAN_QUEUE_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("FIELDSCAN_JOB_TIMEOUT_SECS") {
            config.job_timeout_secs = parse_positive("FIELDSCAN_JOB_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("FIELDSCAN_CLAMP_POLICY") {
            config.clamp_policy = ClampPolicy::from_str(raw.trim()).map_err(|_| {
                ConfigError::InvalidValue {
                    key: "FIELDSCAN_CLAMP_POLICY".into(),
                    value: raw.clone(),
                }
            })?;
        }

        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DATABASE_FILE))
    }
}

fn parse_positive<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}
