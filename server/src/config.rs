use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const CURRENT_DIR: &str = "./";
const BLOBS_DIR: &str = "uploads";
const SCRATCH_DIR: &str = "temp";

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const HOUR: u64 = 60 * 60;

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {name}")]
pub struct ConfigError {
    pub name: String,
    pub value: String,
}

/// Server settings. Every field has a default and an environment override.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub port: u16,
    /// Ceiling for a single uploaded file
    pub max_file_size: u64,
    /// Ceiling for the number of files in one upload request
    pub max_files: usize,
    pub file_retention: Duration,
    pub scratch_retention: Duration,
    pub sweep_interval: Duration,
    /// Deflate level used for archives, fixed for the process lifetime
    pub compression_level: i64,
    /// Largest span served by one range request
    pub range_chunk_size: u64,
    /// Events buffered per progress observer before it starts missing some
    pub progress_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(CURRENT_DIR),
            port: 5000,
            max_file_size: 10 * GIB,
            max_files: 50,
            file_retention: Duration::from_secs(24 * HOUR),
            scratch_retention: Duration::from_secs(HOUR),
            sweep_interval: Duration::from_secs(HOUR),
            compression_level: 9,
            range_chunk_size: MIB,
            progress_capacity: 256,
        }
    }
}

impl Config {
    /// Builds configuration from `GDROP_*` environment variables on top of defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            data_dir: env::var("GDROP_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            port: env_or("GDROP_PORT", defaults.port)?,
            max_file_size: env_or("GDROP_MAX_FILE_SIZE", defaults.max_file_size)?,
            max_files: env_or("GDROP_MAX_FILES", defaults.max_files)?,
            file_retention: env_secs_or("GDROP_FILE_RETENTION_SECS", defaults.file_retention)?,
            scratch_retention: env_secs_or(
                "GDROP_SCRATCH_RETENTION_SECS",
                defaults.scratch_retention,
            )?,
            sweep_interval: env_secs_or("GDROP_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            compression_level: env_or("GDROP_COMPRESSION_LEVEL", defaults.compression_level)?,
            range_chunk_size: env_or("GDROP_RANGE_CHUNK_SIZE", defaults.range_chunk_size)?,
            progress_capacity: env_or("GDROP_PROGRESS_CAPACITY", defaults.progress_capacity)?,
        })
    }

    #[must_use]
    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join(BLOBS_DIR)
    }

    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.data_dir.join(SCRATCH_DIR)
    }

    /// Largest request body accepted by the upload endpoint.
    #[must_use]
    pub fn request_body_limit(&self) -> usize {
        let limit = self.max_file_size.saturating_mul(self.max_files as u64);
        usize::try_from(limit).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn with_data_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }
}

/// Parses a configuration value, naming the offending setting on failure.
pub fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError {
        name: name.to_owned(),
        value: value.to_owned(),
    })
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => parse_value(name, &value),
        Err(_) => Ok(default),
    }
}

fn env_secs_or(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_or(name, default.as_secs()).map(Duration::from_secs)
}
