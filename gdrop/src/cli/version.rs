use serde::Serialize;
use server::Config;
use std::env;

#[derive(Debug, Clone, Serialize)]
struct VersionInfo {
    pub name: String,
    pub version: String,
    pub os: String,
    pub architecture: String,
    pub default_port: u16,
    pub default_retention_secs: u64,
}

pub fn run() {
    let defaults = Config::default();
    let info = VersionInfo {
        name: clap::crate_name!().to_string(),
        version: clap::crate_version!().to_string(),
        os: env::consts::OS.to_string(),
        architecture: env::consts::ARCH.to_string(),
        default_port: defaults.port,
        default_retention_secs: defaults.file_retention.as_secs(),
    };

    println!("Name           : {}", info.name);
    println!("Version        : {}", info.version);
    println!("OS             : {}", info.os);
    println!("Architecture   : {}", info.architecture);
    println!("Default port   : {}", info.default_port);
    println!("Files kept     : {}s", info.default_retention_secs);
}
