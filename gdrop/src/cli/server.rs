use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::ArgMatches;
use server::config::parse_value;
use server::{Config, ConfigError};

pub const DATA_DIR: &str = "data-dir";
pub const PORT: &str = "port";
pub const MAX_FILE_SIZE: &str = "max-file-size";
pub const MAX_FILES: &str = "max-files";
pub const FILE_RETENTION: &str = "file-retention";
pub const SCRATCH_RETENTION: &str = "scratch-retention";
pub const SWEEP_INTERVAL: &str = "sweep-interval";
pub const COMPRESSION_LEVEL: &str = "compression-level";

pub async fn run(matches: &ArgMatches) -> ExitCode {
    server::init_tracing();

    let config = match Config::from_env().and_then(|c| apply(c, matches)) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match server::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("server stopped. Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Command line flags win over the environment.
fn apply(mut config: Config, matches: &ArgMatches) -> Result<Config, ConfigError> {
    if let Some(dir) = matches.get_one::<String>(DATA_DIR) {
        config.data_dir = PathBuf::from(dir);
    }
    if let Some(v) = flag(matches, PORT)? {
        config.port = v;
    }
    if let Some(v) = flag(matches, MAX_FILE_SIZE)? {
        config.max_file_size = v;
    }
    if let Some(v) = flag(matches, MAX_FILES)? {
        config.max_files = v;
    }
    if let Some(v) = flag(matches, FILE_RETENTION)? {
        config.file_retention = Duration::from_secs(v);
    }
    if let Some(v) = flag(matches, SCRATCH_RETENTION)? {
        config.scratch_retention = Duration::from_secs(v);
    }
    if let Some(v) = flag(matches, SWEEP_INTERVAL)? {
        config.sweep_interval = Duration::from_secs(v);
    }
    if let Some(v) = flag(matches, COMPRESSION_LEVEL)? {
        config.compression_level = v;
    }
    Ok(config)
}

fn flag<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>, ConfigError> {
    matches
        .get_one::<String>(name)
        .map(|v| parse_value(name, v))
        .transpose()
}
